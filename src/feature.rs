//! Feature Labels (§3.1)
//!
//! A `Feature` names an arc out of a vertex: a field label. Every feature is
//! interned so that equality and ordering are cheap integer comparisons and
//! so the same label string always produces the same `FeatureId` for the
//! lifetime of the interner (§4.8 / §5: "the runtime provides a
//! `string <-> Feature` bijection").

use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use dashmap::DashMap;

/// Opaque identity for a `Feature`. Stable and comparable within one
/// interner's lifetime; ordering by id is stable within a run, as required
/// by §3.1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FeatureId(pub u32);

/// The category of a label, determining `is_def`/`is_let`/etc.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FeatureKind {
    /// An ordinary string field label.
    Regular(Arc<str>),
    /// An integer index, used for list elements.
    Int(i64),
    /// A definition label: string starting with `#`.
    Def(Arc<str>),
    /// A hidden label: string starting with `_`, optionally `_#`.
    Hidden(Arc<str>),
    /// An internal identifier naming a `let` binding; never appears as a
    /// visible arc.
    Let(Arc<str>),
}

/// A field label together with its interned identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Feature {
    pub id: FeatureId,
    pub kind: FeatureKind,
}

impl Feature {
    pub fn is_def(&self) -> bool {
        matches!(self.kind, FeatureKind::Def(_))
    }

    pub fn is_let(&self) -> bool {
        matches!(self.kind, FeatureKind::Let(_))
    }

    pub fn is_string(&self) -> bool {
        matches!(
            self.kind,
            FeatureKind::Regular(_) | FeatureKind::Def(_) | FeatureKind::Hidden(_)
        )
    }

    pub fn is_int(&self) -> bool {
        matches!(self.kind, FeatureKind::Int(_))
    }

    pub fn is_regular(&self) -> bool {
        matches!(self.kind, FeatureKind::Regular(_) | FeatureKind::Int(_))
    }

    pub fn is_hidden(&self) -> bool {
        matches!(self.kind, FeatureKind::Hidden(_))
    }

    /// The displayable label text, for diagnostics and the closedness
    /// typo-check report. Integer labels render as decimal.
    pub fn label(&self) -> String {
        match &self.kind {
            FeatureKind::Regular(s) | FeatureKind::Def(s) | FeatureKind::Hidden(s) => {
                s.to_string()
            }
            FeatureKind::Let(s) => format!("let {s}"),
            FeatureKind::Int(i) => i.to_string(),
        }
    }
}

impl fmt::Display for Feature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}

fn classify(raw: &str) -> FeatureKind {
    if let Some(rest) = raw.strip_prefix('#') {
        FeatureKind::Def(Arc::from(rest))
    } else if let Some(rest) = raw.strip_prefix('_') {
        FeatureKind::Hidden(Arc::from(rest))
    } else {
        FeatureKind::Regular(Arc::from(raw))
    }
}

/// Thread-safe label interner. Concurrent use of distinct evaluator
/// contexts is supported (§1), so the interner is the one piece of state
/// they may legitimately share (§5).
#[derive(Debug, Default)]
pub struct FeatureInterner {
    by_label: DashMap<String, FeatureId>,
    by_int: DashMap<i64, FeatureId>,
    entries: DashMap<FeatureId, Feature>,
    next_id: AtomicU32,
}

impl FeatureInterner {
    pub fn new() -> Self {
        Self::default()
    }

    fn alloc_id(&self) -> FeatureId {
        FeatureId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Intern a string label, classifying it into `Regular`/`Def`/`Hidden`.
    pub fn intern_label(&self, raw: &str) -> FeatureId {
        if let Some(existing) = self.by_label.get(raw) {
            return *existing;
        }
        let id = self.alloc_id();
        let kind = classify(raw);
        self.by_label.insert(raw.to_string(), id);
        self.entries.insert(id, Feature { id, kind });
        id
    }

    /// Intern a `let` identifier; never collides with regular labels even
    /// if the text matches, since `let` bindings are invisible arcs.
    pub fn intern_let(&self, raw: &str) -> FeatureId {
        let key = format!("let\0{raw}");
        if let Some(existing) = self.by_label.get(&key) {
            return *existing;
        }
        let id = self.alloc_id();
        self.by_label.insert(key, id);
        self.entries.insert(
            id,
            Feature {
                id,
                kind: FeatureKind::Let(Arc::from(raw)),
            },
        );
        id
    }

    /// Intern an integer index (list element label).
    pub fn intern_int(&self, index: i64) -> FeatureId {
        if let Some(existing) = self.by_int.get(&index) {
            return *existing;
        }
        let id = self.alloc_id();
        self.by_int.insert(index, id);
        self.entries.insert(
            id,
            Feature {
                id,
                kind: FeatureKind::Int(index),
            },
        );
        id
    }

    pub fn feature(&self, id: FeatureId) -> Feature {
        self.entries
            .get(&id)
            .map(|entry| entry.clone())
            .expect("FeatureId not registered with this interner")
    }
}

//! Evaluator Context (§4.9 ADDED)
//!
//! Owns everything one evaluation run needs: the vertex arena, the
//! environment chain, the shared label interner, the regex cache, the
//! definition-id allocator, the scheduler's task/context pools, and the
//! resource-limit configuration. A fresh `EvaluatorContext` corresponds to
//! one independent document; the `FeatureInterner` is the only piece the
//! design notes (§5/§9) call out as safe to share across contexts, so it is
//! held behind an `Arc` rather than owned outright.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, instrument};

use crate::arena::Arena;
use crate::closedness::DefIdAllocator;
use crate::collab::BuiltinRegistry;
use crate::config::EvaluatorConfig;
use crate::conjunct::VertexId;
use crate::env::Environments;
use crate::error::{Bottom, UnifyResult};
use crate::feature::FeatureInterner;
use crate::interner::RegexCache;
use crate::scheduler::Scheduler;
use crate::unify::{self, Ctx};
use crate::vertex::Vertex;

pub struct EvaluatorContext {
    pub arena: Arena<Vertex>,
    pub envs: Environments,
    pub interner: Arc<FeatureInterner>,
    pub regex_cache: RegexCache,
    pub def_ids: DefIdAllocator,
    pub scheduler: Scheduler,
    pub config: EvaluatorConfig,
    /// Maps an original vertex to the overlay clone standing in for it
    /// while one disjunction branch is evaluated (§4.7). Entries exist only
    /// for the duration of that branch's evaluation.
    overlay: HashMap<VertexId, VertexId>,
    depth: u32,
}

impl EvaluatorContext {
    pub fn new(config: EvaluatorConfig) -> Self {
        EvaluatorContext {
            arena: Arena::new(),
            envs: Environments::new(),
            interner: Arc::new(FeatureInterner::new()),
            regex_cache: RegexCache::new(),
            def_ids: DefIdAllocator::new(),
            scheduler: Scheduler::new(),
            config,
            overlay: HashMap::new(),
            depth: 0,
        }
    }

    /// Share an interner across sibling contexts (§5: concurrent,
    /// independent evaluator contexts may share one label interner).
    pub fn with_shared_interner(config: EvaluatorConfig, interner: Arc<FeatureInterner>) -> Self {
        EvaluatorContext {
            arena: Arena::new(),
            envs: Environments::new(),
            interner,
            regex_cache: RegexCache::new(),
            def_ids: DefIdAllocator::new(),
            scheduler: Scheduler::new(),
            config,
            overlay: HashMap::new(),
            depth: 0,
        }
    }

    pub fn new_root(&mut self) -> VertexId {
        self.arena.insert(Vertex::root())
    }

    pub fn overlay_for(&self, original: VertexId) -> Option<VertexId> {
        self.overlay.get(&original).copied()
    }

    pub fn set_overlay(&mut self, original: VertexId, clone: VertexId) {
        self.overlay.insert(original, clone);
    }

    pub fn clear_overlay(&mut self, original: VertexId) {
        self.overlay.remove(&original);
    }

    fn enter(&mut self) -> UnifyResult<()> {
        self.depth += 1;
        if self.depth as usize > self.config.limits.max_depth {
            self.depth -= 1;
            return Err(Bottom::eval("maximum evaluation depth exceeded"));
        }
        Ok(())
    }

    fn exit(&mut self) {
        self.depth = self.depth.saturating_sub(1);
    }

    /// Run unification for `root` and everything reachable from it.
    #[instrument(skip(self, builtins))]
    pub fn unify_root(&mut self, root: VertexId, builtins: &dyn BuiltinRegistry) -> UnifyResult<()> {
        self.enter()?;
        let result = {
            let mut ctx = Ctx {
                arena: &mut self.arena,
                envs: &mut self.envs,
                interner: self.interner.as_ref(),
                overlay: &mut self.overlay,
                scheduler: &mut self.scheduler,
            };
            unify::unify_vertex(&mut ctx, root, builtins)
        };
        self.exit();
        debug!(depth = self.depth, ok = result.is_ok(), "unification pass complete");
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collab::test_stubs::NoBuiltins;
    use crate::conjunct::{CloseInfo, Conjunct, ConjunctExpr};
    use crate::term::{Expr, NumValue, Scalar};
    use crate::vertex::Value;

    #[test]
    fn unify_root_evaluates_a_scalar_document() {
        let mut ctx = EvaluatorContext::new(EvaluatorConfig::default());
        let root = ctx.new_root();
        let env = ctx.envs.root(root);
        ctx.arena.get_mut(root).unwrap().conjuncts.push(Conjunct::new(
            env,
            ConjunctExpr::Expr(Expr::Num(NumValue::Int(42))),
            CloseInfo::root(0),
        ));
        ctx.unify_root(root, &NoBuiltins).unwrap();
        assert!(matches!(
            ctx.arena.get(root).unwrap().base_value,
            Value::Scalar(Scalar::Num(NumValue::Int(42)))
        ));
    }

    #[test]
    fn depth_limit_is_enforced_and_restored_after_a_run() {
        let mut config = EvaluatorConfig::default();
        config.limits.max_depth = 0;
        let mut ctx = EvaluatorContext::new(config);
        let root = ctx.new_root();
        let err = ctx.unify_root(root, &NoBuiltins).unwrap_err();
        assert_eq!(err.code, crate::error::ErrorCode::Eval);
    }

    #[test]
    fn overlay_map_round_trips() {
        let mut ctx = EvaluatorContext::new(EvaluatorConfig::default());
        let original = ctx.new_root();
        let clone = ctx.new_root();
        assert!(ctx.overlay_for(original).is_none());
        ctx.set_overlay(original, clone);
        assert_eq!(ctx.overlay_for(original), Some(clone));
        ctx.clear_overlay(original);
        assert!(ctx.overlay_for(original).is_none());
    }

    #[test]
    fn shared_interner_is_reused_across_contexts() {
        let interner = Arc::new(FeatureInterner::new());
        let a_id = interner.intern_label("shared");
        let ctx_a = EvaluatorContext::with_shared_interner(EvaluatorConfig::default(), interner.clone());
        let b_id = ctx_a.interner.intern_label("shared");
        assert_eq!(a_id, b_id);
    }
}

//! Before and after filters.
//!
//! # Responsibilities
//! - Hold filters per scope in registration order
//! - Run unscoped filters first, then path-scoped filters whose pattern
//!   matches the request path
//! - Expose a scoped filter's captures as params for its duration only
//!
//! # Design Decisions
//! - Filters are synchronous; they inspect and mutate the request context
//! - Returning `Err(Interrupt::Halt(..))` short-circuits the remaining filters

use std::sync::Arc;

use crate::http::{Interrupt, RequestContext};

use super::PathPattern;

/// Filter body.
pub type FilterFn = Arc<dyn Fn(&mut RequestContext) -> Result<(), Interrupt> + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterScope {
    Before,
    After,
}

#[derive(Clone)]
struct Filter {
    pattern: Option<PathPattern>,
    body: FilterFn,
}

/// Ordered before/after filters for one router.
#[derive(Clone, Default)]
pub struct FilterChain {
    before: Vec<Filter>,
    after: Vec<Filter>,
}

impl FilterChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, scope: FilterScope, pattern: Option<PathPattern>, body: FilterFn) {
        let filter = Filter { pattern, body };
        match scope {
            FilterScope::Before => self.before.push(filter),
            FilterScope::After => self.after.push(filter),
        }
    }

    pub fn len(&self, scope: FilterScope) -> usize {
        self.filters(scope).len()
    }

    pub fn is_empty(&self) -> bool {
        self.before.is_empty() && self.after.is_empty()
    }

    fn filters(&self, scope: FilterScope) -> &[Filter] {
        match scope {
            FilterScope::Before => &self.before,
            FilterScope::After => &self.after,
        }
    }

    /// Run every filter of `scope` that applies to `path`.
    pub fn run(
        &self,
        scope: FilterScope,
        path: &str,
        ctx: &mut RequestContext,
    ) -> Result<(), Interrupt> {
        let filters = self.filters(scope);

        for filter in filters.iter().filter(|f| f.pattern.is_none()) {
            (filter.body)(ctx)?;
        }

        for filter in filters {
            let Some(pattern) = &filter.pattern else {
                continue;
            };
            let Some(captures) = pattern.captures(path) else {
                continue;
            };
            let saved = ctx.overlay_params(captures)?;
            let result = (filter.body)(ctx);
            ctx.restore_params(saved);
            result?;
        }

        Ok(())
    }
}

impl std::fmt::Debug for FilterChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FilterChain")
            .field("before", &self.before.len())
            .field("after", &self.after.len())
            .finish()
    }
}

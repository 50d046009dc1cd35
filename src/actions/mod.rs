//! Built-in actions.
//!
//! Each action is a concrete struct registered at startup; discovery is
//! explicit, never reflective. Actions reach the outside world only through
//! the adapter set, and every outbound call goes through the resilience
//! gates via [`ActionContext::call_gated`].

pub mod analyze;
pub mod detect;
pub mod dispatch;
pub mod fetch;
pub mod notify;
pub mod summarize;

use std::sync::Arc;

use crate::error::Result;
use crate::registry::ActionRegistry;

pub use analyze::AnalyzeReviewsAction;
pub use detect::DetectPlatformAction;
pub use dispatch::DispatchIssuesAction;
pub use fetch::FetchPrAction;
pub use notify::NotifyChatAction;
pub use summarize::SummarizeAction;

/// Registry with every built-in action registered.
pub fn builtin_registry() -> Result<Arc<ActionRegistry>> {
    let mut registry = ActionRegistry::new();
    registry.register(Arc::new(FetchPrAction::new()))?;
    registry.register(Arc::new(AnalyzeReviewsAction::new()))?;
    registry.register(Arc::new(DetectPlatformAction::new()))?;
    registry.register(Arc::new(SummarizeAction::new()))?;
    registry.register(Arc::new(DispatchIssuesAction::new()))?;
    registry.register(Arc::new(NotifyChatAction::new()))?;
    Ok(Arc::new(registry))
}

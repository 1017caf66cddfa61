use async_trait::async_trait;

use crate::domain::ValidationVerdict;
use crate::merge::MergedVariant;

/// Runs the validation stages over one merged variant and returns one verdict.
///
/// Implementations never retry and never fail: resource problems are folded
/// into the verdict as actionable compilation failures.
#[async_trait]
pub trait Validator: Send + Sync {
    /// `file_name` is the name the variant is materialized under for compilation.
    async fn validate(&self, variant: &MergedVariant, file_name: &str) -> ValidationVerdict;
}

//! # Budgeted Generation Cache
//!
//! Answers "produce content for X" requests at the lowest cost available:
//! an exact cache hit, a semantically similar earlier response, a template
//! when the daily budget is spent, or a real (paid) generation.
//!
//! ## Example
//!
//! ```rust
//! use scent_cache::generation::{GenerationOutput, RequestFeatures};
//! use scent_cache::{CacheEngine, Provenance};
//!
//! # async fn example() -> anyhow::Result<()> {
//! let engine = CacheEngine::builder().build()?;
//!
//! let features = RequestFeatures::new()
//!     .with_trait("woody", 0.9)
//!     .with_trait("amber", 0.4);
//!
//! let resolved = engine
//!     .resolve_with_templates("description:fragrance-42", &features, || async {
//!         Ok(GenerationOutput::new("A smoky cedar and amber blend.", 120))
//!     })
//!     .await?;
//!
//! assert_eq!(resolved.provenance, Provenance::Generated);
//! # Ok(())
//! # }
//! ```

pub mod budget;
pub mod cache;
pub mod features;
pub mod semantic;
pub mod template;

pub use budget::{BudgetDecision, BudgetPhase, BudgetState, BudgetStatus, BudgetTracker};
pub use cache::{BudgetedGenerationCache, GenerationOutput, Resolved};
pub use features::{FeatureEncoder, HashingEncoder, RequestFeatures, TraitWeight};
pub use semantic::{cosine_similarity, SemanticIndexEntry, SemanticMatch, SemanticMatcher};
pub use template::{Template, TemplateLibrary};

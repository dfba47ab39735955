// Leveler Infrastructure - Filesystem Stages
// Implements: Filter (Extract, Translate, Render) plus output lookup

pub mod extractor;
pub mod latency;
pub mod locator;
pub mod renderer;
pub mod translator;

pub use extractor::FileTextExtractor;
pub use latency::LatencyModel;
pub use locator::ArtifactLocator;
pub use renderer::DocumentRenderer;
pub use translator::GlossaryTranslator;

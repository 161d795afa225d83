//! Model-backed stages: screening (fast tier) and deep classification
//! (high-fidelity tier), plus the provider clients and prompt/response
//! handling they share.

pub mod deep;
pub mod model;
pub mod parse;
pub mod prompts;
pub mod providers;
pub mod screening;

pub use deep::DeepClassifier;
pub use model::{build_models_from_config, DynModel, MockModel, ModelClient, TieredModels};
pub use screening::Screener;

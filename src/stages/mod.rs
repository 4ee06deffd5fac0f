//! The six built-in stages.
//!
//! Each stage is a unit struct whose body is an `async fn apply` returning
//! `Result<()>`; its [`Stage`] impl folds that result into a tagged
//! [`StageResult`](crate::stage::StageResult).

pub mod detect;
pub mod images;
pub mod parse;
pub mod render;
pub mod transform;
pub mod validate;

pub use detect::{detect_kind, DetectKind};
pub use images::GenerateImages;
pub use parse::Parse;
pub use render::Render;
pub use transform::{content_type_hint, Transform};
pub use validate::{validate_artifact, Validate};

use crate::stage::Stage;

/// The built-in stages in execution order.
pub fn default_stages() -> Vec<Box<dyn Stage>> {
    vec![
        Box::new(DetectKind),
        Box::new(Parse),
        Box::new(Transform),
        Box::new(GenerateImages),
        Box::new(Render),
        Box::new(Validate),
    ]
}

//! Authorization pipeline and its builder

mod authorizer;
mod builder;

pub use authorizer::Authorizer;
pub use builder::{AuthorizerBuilder, Tollgate};

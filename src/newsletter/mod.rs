//! Newsletter stage: decide → write copy → publish.

pub mod copywriter;
pub mod decision;
pub mod publisher;

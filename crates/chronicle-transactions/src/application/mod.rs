//! Protocol orchestration over the storage capabilities.

pub mod locks;
pub mod manager;
pub mod scope;

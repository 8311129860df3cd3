pub mod api;
pub mod app;
pub mod model;
pub mod provider;
pub mod retriever;
pub mod service;

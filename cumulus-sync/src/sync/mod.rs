pub mod assign;
pub mod debris;
pub mod engine;
pub mod local_watcher;
pub mod node;
pub mod queue;
pub mod store;

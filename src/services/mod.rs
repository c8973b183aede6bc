pub mod client;
pub mod durations;
pub mod fetcher;
pub mod finalize;
pub mod lookup;
pub mod orchestrator;
pub mod poller;
pub mod publisher;
pub mod static_server;
pub mod store;
pub mod submitter;

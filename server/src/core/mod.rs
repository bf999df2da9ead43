pub mod app;
pub mod budget;
pub mod webserver;
pub mod write_queue;

// vim: ts=4

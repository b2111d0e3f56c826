pub mod commands;
pub mod correlate;
pub mod document;
pub mod entity;
pub mod mapping;
pub mod output;
pub mod poll;
pub mod section;
pub mod settings;

use std::sync::Arc;

pub mod api;
pub mod cleanup;
pub mod composer;
pub mod config;
pub mod database;
pub mod dispatcher;
pub mod error;
pub mod health;
pub mod logging;
pub mod queue;
pub mod scheduler;
pub mod smtp;
pub mod template;

pub use database::establish_connection;

#[derive(Clone)]
pub struct AppState {
    pub db: Arc<sea_orm::DatabaseConnection>,
    pub config: Arc<config::Config>,
    pub queue: queue::QueueManager,
    pub templates: Arc<template::TemplateEngine>,
    pub scheduler: Arc<scheduler::Scheduler>,
    pub health: Arc<health::HealthReporter>,
}

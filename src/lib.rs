// Warren - authorizing administration gateway for RabbitMQ clusters

pub mod access;
pub mod audit;
pub mod auth;
pub mod config;
pub mod constants;
pub mod error;
pub mod gateway;
pub mod logging;
pub mod metrics;
pub mod model;
pub mod pagination;
pub mod rabbitmq;
pub mod rate_limit;
pub mod router;
pub mod security;
pub mod service;
pub mod store;

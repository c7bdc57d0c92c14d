//! # Shop payment gateway server
//! This crate hosts the server process for the shop payment gateway. It is responsible for:
//! * Receiving webhook notifications from Stripe, PayPal and Netopia, checking their signatures, and handing them to
//!   the payment engine, which applies each provider event at most once.
//! * Cancelling orders that were not paid within the payment window.
//! * Replaying webhook deliveries that failed for a reason that may go away (e.g. the order was not linked yet).
//!
//! The background jobs use leader election, so any number of replicas can run against the same Postgres database.
//!
//! ## Configuration
//! The server is configured via environment variables. See [config](config/index.html) for more information.
//!
//! ## Routes
//! * `/health`: A health check route that returns a 200 OK response.
//! * `/webhook/stripe`, `/webhook/paypal`, `/webhook/netopia`: Provider webhooks.
pub mod cli;
pub mod config;
pub mod data_objects;
pub mod errors;
pub mod expiry_worker;
pub mod helpers;
pub mod integrations;
pub mod middleware;
pub mod routes;
pub mod server;
pub mod webhook_retry_worker;

#[cfg(test)]
mod endpoint_tests;

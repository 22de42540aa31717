//! Dealer Financing API Library
//!
//! Intake, persistence, administration, and analytics for vehicle financing
//! applications submitted through the dealership's public financing form.
//!
//! # Modules
//!
//! - `api`: API-layer components.
//! - `core`: Domain logic and shared errors/models.
//! - `analytics`: Rolling six-month financing rollups.
//! - `application_view`: Denormalized admin view of one application.
//! - `auth_gateway`: Client for the external session service gating admin routes.
//! - `config`: Configuration management.
//! - `customer_resolver`: Find-or-create of customers by email.
//! - `db`: Database connection, pool management, and schema checks.
//! - `errors`: Error handling types.
//! - `financing_storage`: Database storage operations.
//! - `handlers`: HTTP request handlers.
//! - `models`: Core data models.
//! - `routes`: Router assembly and middleware.
//! - `validation`: Submission schema validation.

pub mod api;
pub mod core;

pub mod analytics;
pub mod application_view;
pub mod auth_gateway;
pub mod config;
pub mod customer_resolver;
pub mod db;
pub mod errors;
pub mod financing_storage;
pub mod handlers;
pub mod models;
pub mod routes;
pub mod validation;

pub mod config;
pub mod contracts;
pub mod db;
pub mod redis_bus;

pub use config::ServiceConfig;
pub use contracts::{
    CreateDonationRequest, CreateDonationResponse, DecisionView, SubmitDecisionRequest,
    VerifyDonationRequest,
};
pub use db::connect_database;
pub use redis_bus::RedisBus;

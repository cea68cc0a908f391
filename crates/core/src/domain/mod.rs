pub mod article;
pub mod contract;
pub mod portfolio;
pub mod request;
pub mod sentiment;
pub mod tracking;

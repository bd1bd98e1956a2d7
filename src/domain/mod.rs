pub mod company;
pub mod ports;
pub mod request;

pub mod bank;
pub mod fnv;
pub mod params;
pub mod random;
pub mod survey_client;
pub mod survey_config;

//! Stochastic compartmental simulation of an epidemic in a city stratified by age group,
//! risk group and vaccination status, driven by staged-alert intervention policies.
//!
//! A [`replication::Replication`] is one sample path. Each day it
//! * picks the transmission reduction in force, either replayed from historical data or
//!   chosen by a [`policy::Policy`] from recent hospital statistics,
//! * advances every vaccine [`stratum::Stratum`] through the SEIR-type compartments
//!   with binomial transitions over a fixed number of sub-steps ([`engine`]),
//! * moves susceptible mass between strata according to the vaccination program
//!   ([`vaccine`]),
//! * records aggregated histories and checks that the population is conserved.
//!
//! On top of the replication sit the sample-path acceptance procedure
//! ([`sample_paths`]), which keeps only paths agreeing with the observed hospital census
//! and checkpoints them ([`checkpoint`]), and the evaluation of a grid of threshold
//! policies ([`thresholds`], [`evaluation`]) on those stored paths.
#[macro_use]
mod macros;

pub mod calendar;
pub mod checkpoint;
pub mod city;
pub mod compartments;
pub mod config;
pub mod engine;
pub mod error;
pub mod evaluation;
pub mod log;
pub mod numeric;
pub mod params;
pub mod policy;
pub mod progress;
pub mod random;
pub mod replication;
pub mod report;
pub mod runner;
pub mod sample_paths;
pub mod stratum;
pub mod thresholds;
pub mod vaccine;
pub mod variants;

pub use error::SimError;

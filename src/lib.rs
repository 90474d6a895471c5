//! Resilient feed-to-queue polling pipeline.
//!
//! A [`scheduler::Scheduler`] fires a [`pipeline::Pipeline`] at a fixed rate.
//! Each cycle fetches one feed through a [`resilience::ResilientFetcher`]
//! (bounded retry plus circuit breaker) and hands every resulting
//! [`article::Article`] to a [`publish::PublisherSink`], in feed order.

pub mod article;
pub mod config;
pub mod feed;
pub mod pipeline;
pub mod publish;
pub mod resilience;
pub mod scheduler;

//! Per-client daily quota on `/query`.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::num::NonZeroU32;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{ConnectInfo, Request, State};
use axum::http::HeaderValue;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use governor::clock::DefaultClock;
use governor::middleware::StateInformationMiddleware;
use governor::state::keyed::DefaultKeyedStateStore;
use governor::{Quota, RateLimiter};

use crate::core::errors::ApiError;
use crate::state::AppState;

pub const REMAINING_HEADER: &str = "x-remaining-requests";

const DAY: Duration = Duration::from_secs(24 * 60 * 60);
/// Checks between sweeps of fully refilled buckets.
const PRUNE_INTERVAL: usize = 1_024;

type KeyedLimiter = RateLimiter<
    IpAddr,
    DefaultKeyedStateStore<IpAddr>,
    DefaultClock,
    StateInformationMiddleware,
>;

/// A token bucket per client IP holding a full day's allowance, refilled
/// evenly over 24 hours.
#[derive(Clone)]
pub struct QueryLimiter {
    limiter: Arc<KeyedLimiter>,
    checks: Arc<AtomicUsize>,
}

impl QueryLimiter {
    /// `None` when `daily_limit` is zero, which disables limiting.
    pub fn per_day(daily_limit: u32) -> Option<Self> {
        let daily_limit = NonZeroU32::new(daily_limit)?;
        let quota = Quota::with_period(DAY / daily_limit.get())?.allow_burst(daily_limit);
        let limiter = RateLimiter::keyed(quota).with_middleware::<StateInformationMiddleware>();
        Some(Self {
            limiter: Arc::new(limiter),
            checks: Arc::new(AtomicUsize::new(0)),
        })
    }

    /// Takes one request from the client's allowance and returns what is left.
    pub fn check(&self, client: IpAddr) -> Result<u32, ApiError> {
        self.prune_periodically();

        match self.limiter.check_key(&client) {
            Ok(snapshot) => Ok(snapshot.remaining_burst_capacity()),
            Err(_) => {
                tracing::info!(client = %client, "Daily request limit reached");
                Err(ApiError::TooManyRequests(
                    "Daily request limit reached".to_string(),
                ))
            }
        }
    }

    /// Drops clients whose bucket has refilled completely. Runs once every
    /// `PRUNE_INTERVAL` checks so the full-map scan stays off the common path.
    fn prune_periodically(&self) {
        let seen = self.checks.fetch_add(1, Ordering::Relaxed) + 1;
        if seen % PRUNE_INTERVAL == 0 {
            self.limiter.retain_recent();
            self.limiter.shrink_to_fit();
        }
    }

    fn tracked_clients(&self) -> usize {
        self.limiter.len()
    }
}

pub async fn limit_queries(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Response {
    let Some(limiter) = state.query_limiter.as_ref() else {
        return next.run(request).await;
    };

    let client = client_ip(&request);
    match limiter.check(client) {
        Ok(remaining) => {
            let mut response = next.run(request).await;
            set_remaining(&mut response, remaining);
            response
        }
        Err(err) => {
            let mut response = err.into_response();
            set_remaining(&mut response, 0);
            response
        }
    }
}

fn client_ip(request: &Request) -> IpAddr {
    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip())
        .unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED))
}

fn set_remaining(response: &mut Response, remaining: u32) {
    response
        .headers_mut()
        .insert(REMAINING_HEADER, HeaderValue::from(remaining));
}

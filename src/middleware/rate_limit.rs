use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use axum::body::Body;
use axum::extract::State;
use axum::http::{Request, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;

const WINDOW: Duration = Duration::from_secs(1);
/// Windows untouched this long are dropped on the next insert.
const STALE_AFTER: Duration = Duration::from_secs(60);
const PRUNE_ABOVE: usize = 1024;

#[derive(Debug)]
struct Window {
    opened: Instant,
    accepted: u32,
}

/// Fixed one-second window per client over the public REST surface. A
/// chatty user exhausts only their own window; everyone else keeps
/// going. The real-time channel has its own per-session pacing and is
/// not routed through this.
#[derive(Clone, Debug)]
pub struct PublicRateLimiter {
    limit: u32,
    windows: Arc<Mutex<HashMap<String, Window>>>,
}

impl PublicRateLimiter {
    pub fn new(limit: u32) -> Self {
        Self {
            limit: limit.max(1),
            windows: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    fn try_accept(&self, client: &str) -> bool {
        let mut windows = self.windows.lock().expect("rate limiter mutex poisoned");
        let now = Instant::now();

        if windows.len() > PRUNE_ABOVE && !windows.contains_key(client) {
            windows.retain(|_, w| now.duration_since(w.opened) < STALE_AFTER);
        }

        let window = windows.entry(client.to_string()).or_insert(Window {
            opened: now,
            accepted: 0,
        });
        if now.duration_since(window.opened) >= WINDOW {
            window.opened = now;
            window.accepted = 0;
        }
        if window.accepted < self.limit {
            window.accepted += 1;
            true
        } else {
            false
        }
    }
}

/// Who the window belongs to. The history routes carry the user id as
/// their final path segment; for everything else the client is the
/// nearest proxy hop, with a shared bucket as the last resort.
fn client_key(req: &Request<Body>) -> String {
    let path = req.uri().path();
    if let Some(user_id) = path
        .strip_prefix("/api/chat_history/")
        .filter(|rest| !rest.is_empty() && !rest.contains('/'))
    {
        return format!("user:{}", user_id);
    }
    if let Some(forwarded) = req
        .headers()
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty())
    {
        return format!("addr:{}", forwarded);
    }
    "shared".to_string()
}

pub async fn public_rate_limit(
    State(limiter): State<PublicRateLimiter>,
    req: Request<Body>,
    next: Next,
) -> Response {
    let client = client_key(&req);
    if !limiter.try_accept(&client) {
        tracing::warn!(client = %client, "rate limit exceeded");
        return (
            StatusCode::TOO_MANY_REQUESTS,
            Json(serde_json::json!({ "error": "rate limit exceeded" })),
        )
            .into_response();
    }
    next.run(req).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn window_caps_per_client_then_resets() {
        let limiter = PublicRateLimiter::new(2);
        assert!(limiter.try_accept("user:u1"));
        assert!(limiter.try_accept("user:u1"));
        assert!(!limiter.try_accept("user:u1"));

        limiter
            .windows
            .lock()
            .unwrap()
            .get_mut("user:u1")
            .unwrap()
            .opened = Instant::now() - Duration::from_secs(2);
        assert!(limiter.try_accept("user:u1"));
    }

    #[test]
    fn one_client_exhausting_its_window_does_not_block_another() {
        let limiter = PublicRateLimiter::new(1);
        assert!(limiter.try_accept("user:u1"));
        assert!(!limiter.try_accept("user:u1"));
        assert!(limiter.try_accept("user:u2"));
        assert!(limiter.try_accept("addr:10.0.0.9"));
    }

    #[test]
    fn derives_key_from_history_path_then_forwarded_header() {
        let req = Request::builder()
            .uri("/api/chat_history/u1")
            .body(Body::empty())
            .unwrap();
        assert_eq!(client_key(&req), "user:u1");

        let req = Request::builder()
            .uri("/search_jobs")
            .header("x-forwarded-for", "203.0.113.5, 10.0.0.1")
            .body(Body::empty())
            .unwrap();
        assert_eq!(client_key(&req), "addr:203.0.113.5");

        let req = Request::builder()
            .uri("/search_jobs")
            .body(Body::empty())
            .unwrap();
        assert_eq!(client_key(&req), "shared");
    }

    #[test]
    fn prunes_stale_windows_once_the_map_grows() {
        let limiter = PublicRateLimiter::new(1);
        {
            let mut windows = limiter.windows.lock().unwrap();
            let old = Instant::now() - Duration::from_secs(120);
            for i in 0..(PRUNE_ABOVE + 1) {
                windows.insert(format!("user:{}", i), Window { opened: old, accepted: 1 });
            }
        }
        assert!(limiter.try_accept("user:fresh"));
        assert!(limiter.windows.lock().unwrap().len() < PRUNE_ABOVE);
    }
}

//! Thin adapters from callback-style host services onto promises.
use std::any::Any;
use std::rc::Rc;
use std::time::Duration;

use tracing::debug;

use crate::{timer, Error, Promise, Table, Value};

/// A promise that fulfills with `Nil` after `seconds`.
///
/// Negative or NaN delays count as zero. An infinite delay, or one too
/// large for a [`Duration`], leaves the promise pending forever.
pub fn sleep(seconds: f64) -> Promise {
    let delay = match Duration::try_from_secs_f64(seconds) {
        Ok(delay) => Some(delay),
        Err(_) if seconds > 0.0 => None,
        Err(_) => Some(Duration::ZERO),
    };
    Promise::new(move |resolve, _| {
        match delay {
            Some(delay) => timer::schedule_after(delay, move || resolve.call(())),
            None => debug!(seconds, "sleep never ends"),
        }
        Ok(())
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CacheMode {
    #[default]
    Default,
    NoStore,
    Reload,
    NoCache,
    ForceCache,
    OnlyIfCached,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FetchRequest {
    pub url: String,
    pub method: String,
    pub body: Option<Vec<u8>>,
    pub headers: Vec<(String, String)>,
    pub cache_mode: CacheMode,
    pub follow_redirects: bool,
}

impl FetchRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            method: "GET".to_string(),
            body: None,
            headers: Vec::new(),
            cache_mode: CacheMode::default(),
            follow_redirects: true,
        }
    }

    pub fn method(mut self, method: impl Into<String>) -> Self {
        self.method = method.into();
        self
    }

    pub fn body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn cache_mode(mut self, cache_mode: CacheMode) -> Self {
        self.cache_mode = cache_mode;
        self
    }

    pub fn follow_redirects(mut self, follow: bool) -> Self {
        self.follow_redirects = follow;
        self
    }
}

/// What a [`FetchService`] reports back.
///
/// Services that signal failure with a negative status may report it as a
/// `Response`; [`fetch`] treats any negative status as a failure.
#[derive(Debug, Clone, PartialEq)]
pub enum FetchOutcome {
    Response {
        status: i32,
        body: Vec<u8>,
        headers: Vec<(String, String)>,
    },
    Failed {
        reason: String,
    },
}

pub trait FetchService {
    fn fetch_async(&self, request: FetchRequest, callback: Box<dyn FnOnce(FetchOutcome)>);
}

/// Issues `request` through `service`.
///
/// Fulfills with a `{url, ok, status, body, headers}` table for every
/// response, including non-2xx ones (`ok` is then `false`). Rejects with
/// [`Error::Fetch`] only when no response was received.
pub fn fetch(service: &dyn FetchService, request: FetchRequest) -> Promise {
    let url = request.url.clone();
    Promise::new(move |resolve, reject| {
        service.fetch_async(
            request,
            Box::new(move |outcome| match outcome {
                FetchOutcome::Response { status, body, .. } if status < 0 => {
                    let reason = match String::from_utf8_lossy(&body) {
                        text if text.is_empty() => format!("status {status}"),
                        text => text.into_owned(),
                    };
                    debug!(%url, %reason, "fetch failed");
                    reject.call(Error::Fetch { url, reason });
                }
                FetchOutcome::Response {
                    status,
                    body,
                    headers,
                } => {
                    debug!(%url, status, "fetch completed");
                    let mut response = Table::new();
                    response.insert("url", url);
                    response.insert("ok", (200..300).contains(&status));
                    response.insert("status", status);
                    response.insert("body", body);
                    response.insert("headers", headers.into_iter().collect::<Table>());
                    resolve.call(response);
                }
                FetchOutcome::Failed { reason } => {
                    debug!(%url, %reason, "fetch failed");
                    reject.call(Error::Fetch { url, reason });
                }
            }),
        );
        Ok(())
    })
}

pub trait ImageLoader {
    fn load_image_async(&self, url: &str, callback: Box<dyn FnOnce(Option<Rc<dyn Any>>)>);
}

/// Fulfills with the loaded image as a [`Value::Host`].
pub fn fetch_img(loader: &dyn ImageLoader, url: &str) -> Promise {
    let url = url.to_string();
    Promise::new(move |resolve, reject| {
        let requested = url.clone();
        loader.load_image_async(
            &requested,
            Box::new(move |image| match image {
                Some(image) => resolve.call(Value::Host(image)),
                None => {
                    debug!(%url, "image failed to load");
                    reject.call(Error::ImageLoad { url });
                }
            }),
        );
        Ok(())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::PromiseState;
    use std::cell::RefCell;
    use std::time::Instant;

    /// Answers every request from a canned outcome on the next timer tick.
    struct Canned {
        outcome: FetchOutcome,
        seen: RefCell<Vec<FetchRequest>>,
    }

    impl FetchService for Canned {
        fn fetch_async(&self, request: FetchRequest, callback: Box<dyn FnOnce(FetchOutcome)>) {
            self.seen.borrow_mut().push(request);
            let outcome = self.outcome.clone();
            timer::schedule_after(Duration::ZERO, move || callback(outcome));
        }
    }

    fn canned(outcome: FetchOutcome) -> Canned {
        Canned {
            outcome,
            seen: RefCell::new(Vec::new()),
        }
    }

    #[test]
    fn test_sleep_waits_and_yields_nil() {
        let started = Instant::now();
        let nap = sleep(0.01);
        assert_eq!(timer::run_until(&nap), PromiseState::Fulfilled);
        assert!(started.elapsed() >= Duration::from_millis(10));
        assert_eq!(nap.result(), Value::Nil);
        assert_eq!(timer::run_until(&sleep(-1.0)), PromiseState::Fulfilled);
        assert_eq!(timer::run_until(&sleep(f64::NAN)), PromiseState::Fulfilled);
    }

    #[test]
    fn test_endless_sleep_stays_pending() {
        let huge = sleep(1.8e19);
        let forever = sleep(f64::INFINITY);
        assert_eq!(timer::run_until(&huge), PromiseState::Pending);
        assert_eq!(timer::run_until(&forever), PromiseState::Pending);
        assert!(timer::default_loop().is_idle());
    }

    #[test]
    fn test_fetch_resolves_even_for_error_status() {
        let service = canned(FetchOutcome::Response {
            status: 404,
            body: b"missing".to_vec(),
            headers: vec![("content-type".into(), "text/plain".into())],
        });
        let request = FetchRequest::get("http://example.test/a")
            .method("POST")
            .body("payload")
            .header("x-token", "t")
            .cache_mode(CacheMode::NoStore)
            .follow_redirects(false);
        let promise = fetch(&service, request.clone());
        timer::run();

        assert_eq!(*service.seen.borrow(), vec![request]);
        let (result, state) = promise.inspect();
        assert_eq!(state, PromiseState::Fulfilled);
        let response = result.as_table().unwrap();
        assert_eq!(response.get("url"), Some(&Value::from("http://example.test/a")));
        assert_eq!(response.get("ok"), Some(&Value::from(false)));
        assert_eq!(response.get("status"), Some(&Value::from(404)));
        assert_eq!(response.get("body").and_then(Value::as_bytes), Some(&b"missing"[..]));
        let headers = response.get("headers").and_then(Value::as_table).unwrap();
        assert_eq!(headers.get("content-type"), Some(&Value::from("text/plain")));
    }

    #[test]
    fn test_fetch_rejects_on_failure() {
        let failed = fetch(
            &canned(FetchOutcome::Failed {
                reason: "connection refused".into(),
            }),
            FetchRequest::get("http://example.test/down"),
        );
        let negative = fetch(
            &canned(FetchOutcome::Response {
                status: -1,
                body: Vec::new(),
                headers: Vec::new(),
            }),
            FetchRequest::get("http://example.test/neg"),
        );
        timer::run();
        assert_eq!(
            failed.result().as_error(),
            Some(&Error::Fetch {
                url: "http://example.test/down".into(),
                reason: "connection refused".into(),
            })
        );
        assert_eq!(
            negative.result().as_error(),
            Some(&Error::Fetch {
                url: "http://example.test/neg".into(),
                reason: "status -1".into(),
            })
        );
    }

    struct Images;

    impl ImageLoader for Images {
        fn load_image_async(&self, url: &str, callback: Box<dyn FnOnce(Option<Rc<dyn Any>>)>) {
            let image: Option<Rc<dyn Any>> = url.ends_with(".png").then(|| Rc::new((64_u32, 32_u32)) as Rc<dyn Any>);
            timer::schedule_after(Duration::ZERO, move || callback(image));
        }
    }

    #[test]
    fn test_fetch_img() {
        let loaded = fetch_img(&Images, "logo.png");
        let missing = fetch_img(&Images, "logo.txt");
        timer::run();
        assert_eq!(loaded.state(), PromiseState::Fulfilled);
        assert_eq!(loaded.result().as_host::<(u32, u32)>(), Some(&(64, 32)));
        assert_eq!(
            missing.result().as_error(),
            Some(&Error::ImageLoad {
                url: "logo.txt".into()
            })
        );
    }
}

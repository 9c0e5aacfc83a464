// SPDX-License-Identifier: MIT

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use http_body_util::Full;
use hyper::{Request, Response, StatusCode};

use crate::duration;

pub const GREETING: &str = "hello app on handover!\n";

pub async fn route<B>(req: Request<B>) -> Response<Full<Bytes>> {
    if req.uri().path().starts_with("/sleep/") {
        let query = req.uri().query().unwrap_or_default().to_owned();
        sleep(&query).await
    } else {
        Response::new(Full::new(Bytes::from_static(GREETING.as_bytes())))
    }
}

/// `/sleep/?duration=1.5s`: wait, then report who answered.
async fn sleep(query: &str) -> Response<Full<Bytes>> {
    let requested = url::form_urlencoded::parse(query.as_bytes())
        .find(|(key, _)| key == "duration")
        .map(|(_, value)| value.into_owned())
        .unwrap_or_default();
    let nanos = match duration::parse(&requested) {
        Ok(nanos) => nanos,
        Err(e) => return text(StatusCode::BAD_REQUEST, format!("{e}\n")),
    };

    let started = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    if let Ok(nanos) = u64::try_from(nanos) {
        tokio::time::sleep(Duration::from_nanos(nanos)).await;
    }

    text(
        StatusCode::OK,
        format!(
            "started at {}.{:09} slept for {nanos} nanoseconds from pid {}.\n",
            started.as_secs(),
            started.subsec_nanos(),
            std::process::id()
        ),
    )
}

fn text(status: StatusCode, body: String) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from(body)));
    *response.status_mut() = status;
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;

    async fn call(uri: &str) -> (StatusCode, String) {
        let req = Request::get(uri).body(()).unwrap();
        let response = route(req).await;
        let status = response.status();
        let body = response.into_body().collect().await.unwrap().to_bytes();
        (status, String::from_utf8(body.to_vec()).unwrap())
    }

    #[tokio::test]
    async fn test_root() {
        assert_eq!(call("/").await, (StatusCode::OK, GREETING.to_string()));
        assert_eq!(call("/anything").await.1, GREETING);
    }

    #[tokio::test]
    async fn test_sleep_reports_duration_and_pid() {
        let (status, body) = call("/sleep/?duration=20ms").await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("slept for 20000000 nanoseconds"), "{body}");
        assert!(body.contains(&format!("from pid {}.", std::process::id())));
    }

    #[tokio::test]
    async fn test_sleep_rejects_bad_duration() {
        let (status, body) = call("/sleep/?duration=forever").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body, "time: invalid duration \"forever\"\n");

        let (status, _) = call("/sleep/").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }
}

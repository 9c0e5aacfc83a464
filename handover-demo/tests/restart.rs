// SPDX-License-Identifier: MIT

mod harness;

use std::time::Duration;

use harness::{Demo, PidGuard, Result, get, responder_pid, send_signal, wait_until_refused};
use nix::sys::signal::Signal;
use tokio::time::{Instant, sleep};

#[tokio::test]
async fn test_restart_hands_over_without_dropping_requests() -> Result<()> {
    let mut demo = Demo::start().await?;
    let port = demo.port;
    let old_pid = demo.pid();

    let slow = tokio::spawn(async move {
        get(port, "/sleep/?duration=2s")
            .await
            .map_err(|e| e.to_string())
    });
    sleep(Duration::from_millis(300)).await;

    send_signal(old_pid, Signal::SIGUSR2)?;

    // Keep asking until the successor answers; no request may fail in between.
    let deadline = Instant::now() + Duration::from_secs(30);
    let new_pid = loop {
        let (status, body) = get(port, "/sleep/?duration=0s").await?;
        assert_eq!(status, 200, "{body}");
        let pid = responder_pid(&body).ok_or_else(|| format!("no pid in {body:?}"))?;
        if pid != old_pid {
            break pid;
        }
        assert!(Instant::now() < deadline, "successor never answered");
        sleep(Duration::from_millis(50)).await;
    };
    let _successor = PidGuard(new_pid);

    let (status, body) = slow.await??;
    assert_eq!(status, 200);
    assert!(body.contains("slept for 2000000000 nanoseconds"), "{body}");
    assert_eq!(responder_pid(&body), Some(old_pid));

    let code = demo.process.wait_exit(Duration::from_secs(10)).await?;
    assert_eq!(code, Some(0));

    // The socket survived the old process.
    let (status, body) = get(port, "/").await?;
    assert_eq!(status, 200);
    assert_eq!(body, "hello app on handover!\n");

    send_signal(new_pid, Signal::SIGTERM)?;
    wait_until_refused(port, Duration::from_secs(10)).await?;
    Ok(())
}

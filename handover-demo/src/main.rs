// SPDX-License-Identifier: MIT

#![warn(clippy::dbg_macro)]

use handover::{Result, Server};
use hyper::body::Incoming;

mod config;
mod duration;
mod handlers;

async fn inner_main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = config::load()?;
    Server::http(config, handlers::route::<Incoming>)
        .listen_and_serve()
        .await
}

#[tokio::main]
async fn main() -> std::io::Result<()> {
    inner_main().await.map_err(std::io::Error::other)
}

#![deny(unsafe_code)]

use std::process;
use std::time::Duration;

use structopt::StructOpt;

use ssmp::context::ServerContext;
use ssmp::logger::logger_init;
use ssmp::server::SsmpServer;
use ssmp::settings::{Options, Settings};
use ssmp::Result;

#[tokio::main]
async fn main() {
    //init config
    let cfg = Settings::init(Options::from_args()).expect("settings init failed");

    //init log
    logger_init(&cfg.log).expect("logger init failed");

    let _ = Settings::logs();

    let server = match build(cfg) {
        Ok(server) => server,
        Err(e) => {
            log::error!("Failed to start the SSMP server! {e}");
            tokio::time::sleep(Duration::from_millis(100)).await;
            process::exit(1);
        }
    };
    server.start();

    tokio::signal::ctrl_c().await.expect("signal ctrl c");
    server.stop();
    tokio::time::sleep(Duration::from_secs(1)).await;
}

fn build(cfg: &Settings) -> Result<SsmpServer> {
    let mut scx = ServerContext::new();
    if let Some(auth) = cfg.auth.as_ref() {
        scx = scx.authenticator(auth.authenticator()?);
    }

    let mut server = SsmpServer::new(scx.build());

    //tcp
    for listen_cfg in cfg.listeners.tcps.iter() {
        server = server.listener(listen_cfg.bind_tcp()?);
    }

    //tls
    for listen_cfg in cfg.listeners.tlss.iter() {
        #[cfg(feature = "tls")]
        {
            server = server.listener(listen_cfg.bind_tls()?);
        }
        #[cfg(not(feature = "tls"))]
        log::warn!("{} on {} is ignored, built without the tls feature", listen_cfg.name, listen_cfg.addr);
    }

    Ok(server.build())
}

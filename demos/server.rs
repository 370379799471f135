//
//  Sample application.
//
//  Listens on localhost:4918, plain http, no ssl.
//  Connect to http://localhost:4918/webdav/
//

use std::convert::Infallible;
use std::error::Error;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;

use clap::Parser;
use futures_util::future::TryFutureExt;

use webdav_share::{DavHandler, FileSystem, LockSystem};

#[derive(Debug, clap::Parser)]
#[command(about, version)]
struct Cli {
    /// port to listen on
    #[arg(short, long, default_value = "4918")]
    port: u16,
    /// local directory to serve
    #[arg(short, long, default_value = "share")]
    dir: PathBuf,
    /// url prefix the share is mounted at
    #[arg(long, default_value = "/webdav")]
    prefix: String,
    /// persist locks in this file
    #[arg(short, long)]
    locks: Option<PathBuf>,
    /// persist dead properties in this file
    #[arg(long)]
    props: Option<PathBuf>,
    /// serve an html index on GET of a collection
    #[arg(short, long)]
    autoindex: bool,
    /// make written files and directories world-writable
    #[arg(long)]
    relax_permissions: bool,
}

fn build(cli: &Cli) -> DavHandler {
    let fs = match cli.props {
        Some(ref props) => FileSystem::local_with_props(&cli.dir, true, props),
        None => FileSystem::local(&cli.dir, true),
    };
    let ls = match cli.locks {
        Some(ref locks) => LockSystem::File(locks.clone()),
        None => LockSystem::Mem,
    };
    DavHandler::builder(fs)
        .strip_prefix(cli.prefix.clone())
        .locksystem(ls)
        .autoindex(cli.autoindex)
        .relax_permissions(cli.relax_permissions)
        .build()
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();

    let cli = Cli::parse();
    let dav_server = build(&cli);

    let make_service = hyper::service::make_service_fn(|_| {
        let dav_server = dav_server.clone();
        async move {
            let func = move |req| {
                let dav_server = dav_server.clone();
                async move { Ok::<_, Infallible>(dav_server.handle(req).await) }
            };
            Ok::<_, hyper::Error>(hyper::service::service_fn(func))
        }
    });

    let addr = format!("0.0.0.0:{}", cli.port);
    let addr = SocketAddr::from_str(&addr)?;

    let server = hyper::Server::try_bind(&addr)?
        .serve(make_service)
        .map_err(|e| eprintln!("server error: {}", e));

    println!(
        "Serving {} on port {} at {}",
        cli.dir.display(),
        cli.port,
        cli.prefix
    );
    let _ = server.await;
    Ok(())
}

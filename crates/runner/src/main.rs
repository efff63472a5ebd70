//! this crate shows a simple single-session FTP server using the soloftp
//! crate, serving a directory on the local filesystem.

mod storage;

use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::time::Duration;

use crate::storage::DiskStorage;
use soloftp::{Anonymous, FtpBuilder, SystemClock, tcp::TcpAcceptor};

const CONTROL_PORT: u16 = 2121;
const PASSIVE_PORT: u16 = 50009;

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter("runner=debug,soloftp=debug")
        .init();

    let root = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."));
    let storage = DiskStorage::new(&root)?;

    let control = TcpAcceptor::bind((Ipv4Addr::LOCALHOST, CONTROL_PORT))?;
    let data = TcpAcceptor::bind((Ipv4Addr::LOCALHOST, PASSIVE_PORT))?;
    tracing::info!(
        root = %root.display(),
        "FTP server listening on 127.0.0.1:{CONTROL_PORT} (data on {PASSIVE_PORT})"
    );

    let mut server = FtpBuilder::new()
        .passive_addr(Ipv4Addr::LOCALHOST)
        .passive_port(PASSIVE_PORT)
        .build(storage, Anonymous, SystemClock, control, data);

    loop {
        server.tick()?;
        // the tick never blocks outside the data-connection wait, so pace
        // the loop instead of spinning
        std::thread::sleep(Duration::from_millis(5));
    }
}

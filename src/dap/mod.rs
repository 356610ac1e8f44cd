//! Debug Adapter Protocol front end.

mod protocol;
mod server;

use std::io::{self, BufRead};

use tracing::{info, warn};

pub use protocol::{read_message, DapMessage, DapMessageContent, DapWriter};
pub use server::DapServer;

/// Serves DAP requests from `reader` until the client disconnects or the
/// input ends.
pub fn run_dap_mode(mut reader: impl BufRead, writer: DapWriter) -> io::Result<()> {
    info!("DAP server starting");
    let mut server = DapServer::new(writer);

    loop {
        match read_message(&mut reader) {
            Ok(Some(msg)) => {
                if !server.handle_message(msg) {
                    break;
                }
            }
            Ok(None) => break,
            Err(err) if err.kind() == io::ErrorKind::InvalidData => {
                warn!(%err, "skipping malformed message");
            }
            Err(err) => {
                server.shutdown();
                return Err(err);
            }
        }
    }

    server.shutdown();
    info!("DAP server exiting");
    Ok(())
}

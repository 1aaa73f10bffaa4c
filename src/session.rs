//! The one explicit session context owned by the processing loop: which
//! connection is the game server, the reassembly state feeding it, the
//! protocol processor and the statistics it fills.

use crate::capture::fragment::FragmentReassembler;
use crate::capture::locator::ServerAddr;
use crate::capture::tcp::TcpReassembler;
use crate::protocol::processor::PacketProcessor;
use crate::stats::manager::UserManager;
use crate::storage::history::HistoryWriter;

/// Reassembled bytes stopping for this long clears the connection and
/// resumes locating.
pub const CONNECTION_TIMEOUT_MS: u64 = 30_000;

pub struct Session {
    pub server: Option<ServerAddr>,
    pub fragments: FragmentReassembler,
    pub tcp: TcpReassembler,
    pub processor: PacketProcessor,
    pub users: UserManager,
}

impl Session {
    pub fn new(users: UserManager) -> Self {
        Self {
            server: None,
            fragments: FragmentReassembler::new(),
            tcp: TcpReassembler::new(),
            processor: PacketProcessor::new(),
            users,
        }
    }

    /// A new match atomically replaces the old connection and resets every
    /// downstream state. Player statistics are archived and cleared only
    /// when the caller asks for it (the auto-clear setting).
    pub fn switch_server(
        &mut self,
        addr: ServerAddr,
        primed_seq: u32,
        clear_stats: bool,
        history: &HistoryWriter,
    ) {
        if clear_stats {
            self.archive_session(history);
            self.users.clear_all();
        }
        self.users.clear_enemies();
        self.fragments.clear();
        self.tcp.reset();
        self.tcp.prime(primed_seq);
        self.server = Some(addr);
    }

    /// Idle timeout: drop the connection, keep looking for a new one.
    pub fn clear_connection(&mut self) {
        self.server = None;
        self.tcp.reset();
    }

    /// Writes the current session to the history directory, if it has any
    /// combat data. Failures are logged, never fatal.
    pub fn archive_session(&mut self, history: &HistoryWriter) {
        if let Some(dump) = self.users.session_dump() {
            match history.save(&dump) {
                Ok(dir) => {
                    self.users.mark_saved();
                    log::debug!("Session archived to {}", dir.display());
                }
                Err(e) => log::error!("Failed to archive session: {}", e),
            }
        }
    }
}

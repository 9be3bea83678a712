use std::path::{Path, PathBuf};

pub const DAEMON_SOCKET: &str = "daemon.sock";
pub const STORE_FILE: &str = "store.json";

pub fn reviewwatch_root(home: &Path) -> PathBuf {
    home.join(".reviewwatch")
}

pub fn socket_path(home: &Path) -> PathBuf {
    reviewwatch_root(home).join(DAEMON_SOCKET)
}

pub fn store_path(home: &Path) -> PathBuf {
    reviewwatch_root(home).join(STORE_FILE)
}

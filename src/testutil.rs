/// Host commands used by tests that need real child processes

/// A child that stays alive for about 30 seconds
pub fn long_running_command() -> &'static str {
    if cfg!(windows) {
        "ping -n 30 127.0.0.1"
    } else {
        "sleep 30"
    }
}

/// Image name of [`long_running_command`]
pub fn long_running_name() -> &'static str {
    if cfg!(windows) {
        "PING.EXE"
    } else {
        "sleep"
    }
}

/// A child that exits immediately with code 0
pub fn short_lived_command() -> &'static str {
    if cfg!(windows) {
        "cmd.exe /c exit 0"
    } else {
        "sh -c \"exit 0\""
    }
}

/// A child that starts grandchildren of its own
pub fn tree_command() -> &'static str {
    if cfg!(windows) {
        "cmd.exe /c \"ping -n 30 127.0.0.1 > NUL\""
    } else {
        "sh -c \"sleep 30 & sleep 31; wait\""
    }
}

use std::path::PathBuf;

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// The directory name where all sandpool global data is stored.
pub const SANDPOOL_HOME_DIR: &str = ".sandpool";

/// The filename of the run history database.
pub const HISTORY_DB_FILENAME: &str = "history.db";

/// The environment variable that overrides the sandpool home directory.
pub const SANDPOOL_HOME_ENV_VAR: &str = "SANDPOOL_HOME";

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Returns the path where all sandpool global data is stored.
///
/// Respects `SANDPOOL_HOME` when set, otherwise defaults to `~/.sandpool`.
pub fn sandpool_home_path() -> PathBuf {
    if let Ok(home) = std::env::var(SANDPOOL_HOME_ENV_VAR) {
        return PathBuf::from(home);
    }

    dirs::home_dir().unwrap().join(SANDPOOL_HOME_DIR)
}

/// Returns the default path of the run history database.
pub fn history_db_path() -> PathBuf {
    sandpool_home_path().join(HISTORY_DB_FILENAME)
}

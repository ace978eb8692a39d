use std::env;
use std::path::PathBuf;

fn fallback_dotenv_path(tracks_home: Option<PathBuf>, home_dir: Option<PathBuf>) -> Option<PathBuf> {
    match tracks_home {
        Some(base) => Some(base.join(".env")),
        None => Some(home_dir?.join(".tracks/.env")),
    }
}

/// Load `.env` from the working directory, falling back to the per-user file.
pub fn load_dotenv() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    let fallback = fallback_dotenv_path(
        env::var_os("TRACKS_HOME")
            .filter(|v| !v.is_empty())
            .map(PathBuf::from),
        dirs::home_dir(),
    );

    let Some(path) = fallback else {
        return;
    };
    if path.is_file() {
        let _ = dotenvy::from_path(&path);
    }
}

use {
    clap::Parser,
    p9::srv::srv_async,
    p9::users::Users,
    std::path::PathBuf,
    tokio::fs,
};

mod cursor;
mod fid;
mod mode;
mod stat;
mod ufs;

use crate::ufs::Ufs;

#[derive(Debug, clap::Parser)]
struct Cli {
    /// proto!address!port, e.g. tcp!0.0.0.0!564 or unix!/tmp/ufsd.sock!0
    address: String,

    /// Directory to export
    exportdir: PathBuf,

    /// Speak plain 9P2000 instead of the 9P2000.u extension
    #[arg(long)]
    no_dotu: bool,
}

async fn ufsd_main(
    Cli {
        address,
        exportdir,
        no_dotu,
    }: Cli,
) -> p9::Result<i32> {
    if !fs::try_exists(&exportdir).await? {
        return Err(p9::error::Error::Io(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "export directory does not exist",
        )));
    }
    if !fs::metadata(&exportdir).await?.is_dir() {
        return Err(p9::error::Error::Io(std::io::Error::other(
            "export path must be a directory",
        )));
    }

    let root = fs::canonicalize(&exportdir).await?;
    println!("[*] Exporting {:?} ({})", root, if no_dotu { "9P2000" } else { "9P2000.u" });
    println!("[*] Ready to accept clients: {}", address);

    srv_async(
        Ufs {
            root,
            dotu: !no_dotu,
            users: Users,
        },
        &address,
    )
    .await
    .and(Ok(0))
}

#[tokio::main]
async fn main() {
    env_logger::init();

    let exit_code = ufsd_main(Cli::parse()).await.unwrap_or_else(|e| {
        eprintln!("Error: {:?}", e);
        -1
    });

    std::process::exit(exit_code);
}

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Start semdex as a service.
    Daemon {},

    /// Bring the index in line with the bookmark tree
    Sync {
        /// Folder id to track, repeatable. Without this flag the
        /// previously tracked folders are synced again.
        #[clap(short, long = "folder")]
        folders: Vec<String>,
    },

    /// Search the indexed corpus by meaning
    Search {
        /// Query text
        query: String,

        /// 1-based page of the result list
        #[clap(short, long, default_value = "1")]
        page: usize,
    },

    /// Print corpus and index statistics
    Stats {},

    /// Delete every record, chunk, dead link and the cached index
    Clear {
        /// Auto confirm
        #[clap(short, long, default_value = "false")]
        yes: bool,
    },

    /// List the folders of the bookmark tree with their ids
    Folders {},
}

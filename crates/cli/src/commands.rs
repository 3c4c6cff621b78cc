use clap::Subcommand;

#[derive(Subcommand)]
pub enum Commands {
    /// Register a new task in pending state
    Create {
        #[arg(long, help = "Owner the task is accounted to")]
        owner: String,

        #[arg(long, help = "Source stream id or handle")]
        source: String,

        #[arg(long, help = "Target stream id or handle")]
        target: String,

        #[arg(long, help = "First message id to copy", conflicts_with = "tail")]
        start: Option<i64>,

        #[arg(
            long,
            help = "Last message id to copy; omit for the most recent messages",
            requires = "start"
        )]
        end: Option<i64>,

        #[arg(long, help = "Follow the source for new messages instead of copying a range")]
        tail: bool,

        #[arg(
            long = "extra-source",
            help = "Additional stream to follow into the same target",
            requires = "tail"
        )]
        extra_sources: Vec<String>,
    },
    /// Start a pending task
    Start {
        id: String,

        #[arg(
            long,
            help = "Run the task in this process until it finishes; otherwise the next `run` picks it up"
        )]
        wait: bool,
    },
    Pause {
        id: String,
    },
    /// Resume a paused, failed or cancelled task from its last checkpoint
    Resume {
        id: String,

        #[arg(long, help = "Run the task in this process until it finishes")]
        wait: bool,
    },
    Cancel {
        id: String,
    },
    /// Stop a tailing task; it finishes as completed
    StopTail {
        id: String,
    },
    /// Remove a completed, failed or cancelled task and its history
    Delete {
        id: String,
    },
    Status {
        id: String,

        #[arg(long, help = "Print the task record as JSON instead of a table")]
        json: bool,

        #[arg(long, help = "Also print the lifecycle journal")]
        history: bool,
    },
    List {
        #[arg(long, help = "Only tasks of this owner")]
        owner: Option<String>,

        #[arg(long, help = "Print the tasks as JSON instead of a table")]
        json: bool,
    },
    /// Resume every interrupted task and keep running until they finish or a
    /// shutdown signal arrives
    Run,
}

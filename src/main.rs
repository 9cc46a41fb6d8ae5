fn main() -> anyhow::Result<()> {
    notecord::cli::run()
}

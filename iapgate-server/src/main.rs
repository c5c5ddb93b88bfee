fn main() -> anyhow::Result<()> {
    iapgate_server::cli::execute()
}

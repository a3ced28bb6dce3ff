fn main() -> anyhow::Result<()> {
    tiered_seir::runner::main()
}

fn main() -> anyhow::Result<()> {
    televk_lib::run()
}

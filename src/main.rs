fn main() -> std::process::ExitCode {
    metricdeck_lib::run()
}

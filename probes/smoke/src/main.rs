//! 端到端冒烟探针入口.

mod runner;

fn main() {
    simple_logger::SimpleLogger::new()
        .with_level(log::LevelFilter::Info)
        .init()
        .expect("Logger init error");

    let result = runner::run();
    result.report();
}

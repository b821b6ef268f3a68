//! Simple sandbox example - run a small project in each language

use labrun_sandbox::{ExecutionResult, FileMap, ProjectRunner};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let host = ProjectRunner::default();
    println!("=== labrun sandbox ===\n");
    println!("Languages: {:?}\n", host.supported_languages());

    let mut files = FileMap::new();
    files.insert(
        "main.ts".into(),
        "import { greet } from './greet.js';\nconst names: string[] = ['Ada', 'Linus'];\nnames.forEach(n => console.log(greet(n)));".into(),
    );
    files.insert(
        "greet.js".into(),
        "export function greet(name) { return `Hello, ${name}!`; }".into(),
    );
    files.insert("broken.js".into(), "console.warn('about to fail');\nundefinedFn();".into());
    files.insert("main.py".into(), "for i in range(3):\n    print('python', i)".into());

    for entry in ["main.ts", "broken.js", "main.py"] {
        println!("Running {entry}");
        let result = host.run_file(entry, &files).await?;
        print_result(&result);
    }

    Ok(())
}

fn print_result(result: &ExecutionResult) {
    for line in result.output.lines() {
        println!("  stdout: {line}");
    }
    for entry in &result.logs {
        println!("  [{}] {}", entry.kind.as_str(), entry.content);
    }
    match &result.error {
        Some(error) => println!("  error ({:?}): {error}", result.failure),
        None => println!("  ok in {}ms", result.execution_time_ms),
    }
    println!();
}

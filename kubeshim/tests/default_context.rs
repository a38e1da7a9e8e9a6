//! Process-wide default context. Kept in its own test binary because it
//! mutates global state.

use kubeshim::test_support::{Scripted, ScriptedRunner};
use kubeshim::{Client, CommandRequest, ExecutionContext};

#[test]
fn default_applies_until_overridden_by_a_scope() {
    ExecutionContext::set_default(ExecutionContext::default().with_binary("oc"));
    let runner = ScriptedRunner::new([Scripted::ok(""), Scripted::ok("")]);
    let client = Client::with_runner(runner.clone());

    client.invoke(&CommandRequest::new("get")).expect("default");
    ExecutionContext::default()
        .with_binary("kubectl")
        .scoped(|| client.invoke(&CommandRequest::new("get")).expect("scoped"));

    let binaries: Vec<_> = runner
        .calls()
        .into_iter()
        .map(|(ctx, _)| ctx.binary)
        .collect();
    assert_eq!(binaries, vec!["oc", "kubectl"]);
    assert_eq!(ExecutionContext::current().binary, "oc");
}

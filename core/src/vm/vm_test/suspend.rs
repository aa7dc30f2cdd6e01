use super::*;

/// Where a suspending callback parks its resume token; second userdata.
type Parking = Mutex<Option<ResumeToken>>;

/// main: capture("start"); x = pause(); capture(x + 1); return true.
///
/// `pause()I` yields 5 and suspends whenever a [`Parking`] slot is installed.
fn pausing_program() -> Arc<Program> {
    let mut h = Harness::new();
    let pause = h
        .registry
        .register_function("pause", FlowType::Number)
        .bind(|p| {
            p.set_result(5 as FlowNumber);
            if p.userdata2::<Parking>().is_some() {
                let token = p.suspend();
                *p.userdata2::<Parking>()
                    .expect("parking slot")
                    .lock()
                    .expect("parking lock") = Some(token);
            }
        });
    h.capture_str("start");
    let callee = h.b.get_native_function(&pause);
    let x = h.b.create_call_function(callee, vec![], "x");
    let one = h.b.get_int(1);
    let y = h.b.create_add(x, one, "y");
    h.capture(y);
    h.ret(true);
    h.build()
}

fn parked_token(parking: &Parking) -> ResumeToken {
    parking
        .lock()
        .expect("parking lock")
        .take()
        .expect("token was parked")
}

fn suspended_runner(program: &Arc<Program>) -> (Runner, Arc<Captures>, Arc<Parking>) {
    let (buffer, userdata) = captures();
    let parking = Arc::new(Parking::default());
    let slot: Userdata = parking.clone();
    let mut runner = program.create_runner_with(0, Some(userdata), Some(slot));
    assert!(!runner.run(), "a suspended run reports not handled");
    assert_eq!(runner.state(), RunnerState::Suspended);
    (runner, buffer, parking)
}

#[test]
fn test_suspend_and_resume_match_uninterrupted_run() {
    let program = pausing_program();
    let uninterrupted = run_captured(&program, "main");
    assert_eq!(uninterrupted, (true, vec!["start".to_owned(), "6".to_owned()]));

    let (mut runner, buffer, parking) = suspended_runner(&program);
    assert_eq!(*buffer.lock().expect("capture lock"), ["start"]);

    let token = parked_token(&parking);
    assert_eq!(token.runner_id(), runner.id());
    let handled = runner.resume(token);
    assert_eq!(runner.state(), RunnerState::Inactive);
    assert_eq!((handled, buffer.lock().expect("capture lock").clone()), uninterrupted);
}

#[test]
fn test_program_run_abandons_a_suspended_run() {
    let program = pausing_program();
    let (buffer, userdata) = captures();
    let parking = Arc::new(Parking::default());
    let slot: Userdata = parking.clone();
    let handled = program.run("main", Some(userdata), Some(slot)).expect("handler exists");
    assert!(!handled);
    assert_eq!(*buffer.lock().expect("capture lock"), ["start"]);
    assert!(parking.lock().expect("parking lock").is_some());
}

#[test]
#[should_panic(expected = "resume token belongs to runner")]
fn test_resume_with_foreign_token_panics() {
    let program = pausing_program();
    let (mut first, _, _first_parking) = suspended_runner(&program);
    let (_second, _, second_parking) = suspended_runner(&program);
    first.resume(parked_token(&second_parking));
}

#[test]
#[should_panic(expected = "requires an inactive runner")]
fn test_run_while_suspended_panics() {
    let program = pausing_program();
    let (mut runner, _, _parking) = suspended_runner(&program);
    runner.run();
}

#[test]
fn test_runner_can_run_again_after_rewind() {
    let program = pausing_program();
    let (buffer, userdata) = captures();
    let mut runner = program.create_runner_with(0, Some(userdata), None);
    assert!(runner.run());
    assert!(runner.instruction_pointer() > 0);

    runner.rewind();
    assert_eq!(runner.instruction_pointer(), 0);
    assert_eq!(runner.stack_depth(), 0);
    runner.rewind();
    assert_eq!(runner.state(), RunnerState::Inactive);

    assert!(runner.run());
    assert_eq!(*buffer.lock().expect("capture lock"), ["start", "6", "start", "6"]);
}

/// main: hold(); capture("after"); return false. `hold()B` suspends and
/// reports `handled`.
fn holding_program(handled: bool) -> Arc<Program> {
    let mut h = Harness::new();
    let hold = h.registry.register_handler("hold").bind(move |p| {
        p.set_result(handled);
        let token = p.suspend();
        *p.userdata2::<Parking>()
            .expect("parking slot")
            .lock()
            .expect("parking lock") = Some(token);
    });
    let callee = h.b.get_native_handler(&hold);
    h.b.create_invoke_handler(callee, vec![]);
    h.capture_str("after");
    h.ret(false);
    h.build()
}

#[test]
fn test_suspended_handler_result_applies_on_resume() {
    let program = holding_program(true);
    let (mut runner, buffer, parking) = suspended_runner(&program);
    assert!(runner.resume(parked_token(&parking)));
    assert!(buffer.lock().expect("capture lock").is_empty());

    let program = holding_program(false);
    let (mut runner, buffer, parking) = suspended_runner(&program);
    assert!(!runner.resume(parked_token(&parking)));
    assert_eq!(*buffer.lock().expect("capture lock"), ["after"]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_resume_on_another_thread() {
    let program = pausing_program();
    let (mut runner, buffer, parking) = suspended_runner(&program);
    let token = parked_token(&parking);

    let handled = tokio::spawn(async move { runner.resume(token) })
        .await
        .expect("resume task completes");
    assert!(handled);
    assert_eq!(*buffer.lock().expect("capture lock"), ["start", "6"]);
}

#[tokio::test]
async fn test_runners_share_one_program_concurrently() {
    let program = pausing_program();
    let tasks: Vec<_> = (0..8)
        .map(|_| {
            let program = Arc::clone(&program);
            tokio::spawn(async move { run_captured(&program, "main") })
        })
        .collect();
    for task in tasks {
        let (handled, out) = task.await.expect("task completes");
        assert!(handled);
        assert_eq!(out, ["start", "6"]);
    }
}

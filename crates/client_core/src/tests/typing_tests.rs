use super::*;

fn indicator() -> (TypingIndicator, mpsc::UnboundedReceiver<ClientSignal>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (TypingIndicator::new(Arc::new(tx), DEFAULT_TYPING_IDLE), rx)
}

fn drain(rx: &mut mpsc::UnboundedReceiver<ClientSignal>) -> Vec<ClientSignal> {
    let mut out = Vec::new();
    while let Ok(signal) = rx.try_recv() {
        out.push(signal);
    }
    out
}

fn typing(id: &str) -> ClientSignal {
    ClientSignal::Typing {
        receiver_id: UserId::from(id),
    }
}

fn stop_typing(id: &str) -> ClientSignal {
    ClientSignal::StopTyping {
        receiver_id: UserId::from(id),
    }
}

#[tokio::test(start_paused = true)]
async fn burst_of_keystrokes_emits_one_typing_and_one_stop() {
    let (typing_indicator, mut rx) = indicator();
    let bob = UserId::from("bob");

    for _ in 0..3 {
        typing_indicator.keystroke(bob.clone());
        time::sleep(Duration::from_millis(300)).await;
    }
    time::sleep(Duration::from_millis(400)).await;
    assert_eq!(drain(&mut rx), vec![typing("bob")]);

    time::sleep(Duration::from_millis(200)).await;
    assert_eq!(drain(&mut rx), vec![stop_typing("bob")]);

    time::sleep(Duration::from_secs(5)).await;
    assert!(drain(&mut rx).is_empty());
}

#[tokio::test(start_paused = true)]
async fn stop_fires_immediately_and_only_when_active() {
    let (typing_indicator, mut rx) = indicator();

    typing_indicator.stop();
    time::sleep(Duration::from_millis(1)).await;
    assert!(drain(&mut rx).is_empty());

    typing_indicator.keystroke(UserId::from("bob"));
    typing_indicator.stop();
    time::sleep(Duration::from_millis(1)).await;
    assert_eq!(drain(&mut rx), vec![typing("bob"), stop_typing("bob")]);

    time::sleep(Duration::from_secs(2)).await;
    assert!(drain(&mut rx).is_empty());
}

#[tokio::test(start_paused = true)]
async fn switching_receiver_stops_the_previous_one() {
    let (typing_indicator, mut rx) = indicator();

    typing_indicator.keystroke(UserId::from("bob"));
    typing_indicator.keystroke(UserId::from("carol"));
    time::sleep(Duration::from_millis(1)).await;
    assert_eq!(
        drain(&mut rx),
        vec![typing("bob"), stop_typing("bob"), typing("carol")]
    );

    drop(typing_indicator);
    time::sleep(Duration::from_millis(1)).await;
    assert_eq!(drain(&mut rx), vec![stop_typing("carol")]);
}

use super::*;
use std::time::Duration;

#[test]
fn jobs_run_in_order_on_the_queue_thread() {
    let q = SerialQueue::new("test-queue").unwrap();
    let (tx, rx) = mpsc::channel();
    for i in 0..50 {
        let tx = tx.clone();
        assert!(q.post(move || {
            let name = std::thread::current().name().map(str::to_owned);
            tx.send((i, name)).unwrap();
        }));
    }
    let got: Vec<_> = (0..50)
        .map(|_| rx.recv_timeout(Duration::from_secs(5)).unwrap())
        .collect();
    assert!(got.iter().map(|(i, _)| *i).eq(0..50));
    assert!(
        got.iter()
            .all(|(_, name)| name.as_deref() == Some("test-queue"))
    );
}

#[test]
fn survives_panicking_job() {
    let q = SerialQueue::new("panicky").unwrap();
    let (tx, rx) = mpsc::channel();
    q.post(|| panic!("boom"));
    q.post(move || tx.send(7).unwrap());
    assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), 7);
    assert_eq!(q.label(), "panicky");
}

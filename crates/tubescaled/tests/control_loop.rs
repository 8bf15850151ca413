//! Control loop integration tests.
//!
//! Drives the real beanstalkd client against an in-process beanstalkd
//! stand-in, and reconciles into the in-memory ReplicaSet store, to check
//! that whole ticks converge the way the daemon would in a cluster.

use std::collections::BTreeMap;
use std::io::Write;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tokio::sync::watch;

use tubescale_autoscale::{Controller, Reconciler, TickReport};
use tubescale_orchestrator::{InMemoryReplicaSets, ReplicaSetTemplate};
use tubescale_queue::{BeanstalkClient, Collector};

const CONSUMER_YML: &str = "\
apiVersion: apps/v1
kind: ReplicaSet
metadata:
  name: consumer
  labels:
    app: consumer
spec:
  replicas: 1
  selector:
    matchLabels:
      app: consumer
  template:
    metadata:
      labels:
        app: consumer
    spec:
      containers:
        - name: consumer
          image: registry.local/consumer:1.4
          env:
            - name: QUEUE
              value: default
            - name: BEANSTALK_ADDR
              value: beanstalkd:11300
";

/// Ready counts per tube. `None` lists the tube but answers NOT_FOUND to
/// stats-tube, as when a tube vanishes between the two calls.
type Tubes = Arc<Mutex<BTreeMap<String, Option<u64>>>>;

fn framed(body: &str) -> String {
    format!("OK {}\r\n{}\r\n", body.len(), body)
}

fn reply(tubes: &Tubes, command: &str) -> String {
    let tubes = tubes.lock().unwrap();
    if command == "list-tubes" {
        let mut body = String::from("---\n");
        for name in tubes.keys() {
            body.push_str(&format!("- {name}\n"));
        }
        return framed(&body);
    }
    if let Some(name) = command.strip_prefix("stats-tube ") {
        return match tubes.get(name).copied().flatten() {
            Some(ready) => framed(&format!(
                "---\nname: {name}\ncurrent-jobs-urgent: 0\ncurrent-jobs-ready: {ready}\n\
                 current-jobs-reserved: 0\ncurrent-using: 1\ncurrent-watching: 2\n"
            )),
            None => "NOT_FOUND\r\n".to_string(),
        };
    }
    "UNKNOWN_COMMAND\r\n".to_string()
}

/// Serve beanstalkd's list-tubes and stats-tube from `tubes` until the
/// test ends.
async fn fake_beanstalkd(tubes: Tubes) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();

    tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else {
                return;
            };
            let tubes = tubes.clone();
            tokio::spawn(async move {
                let (read, mut write) = stream.into_split();
                let mut lines = BufReader::new(read).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    let answer = reply(&tubes, line.trim_end_matches('\r'));
                    if write.write_all(answer.as_bytes()).await.is_err() {
                        return;
                    }
                }
            });
        }
    });

    addr
}

fn tubes(entries: &[(&str, Option<u64>)]) -> Tubes {
    Arc::new(Mutex::new(
        entries
            .iter()
            .map(|(name, ready)| (name.to_string(), *ready))
            .collect(),
    ))
}

fn template_file() -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(CONSUMER_YML.as_bytes()).unwrap();
    file
}

async fn controller(
    tubes: &Tubes,
    store: &InMemoryReplicaSets,
) -> Controller<BeanstalkClient, InMemoryReplicaSets> {
    let addr = fake_beanstalkd(tubes.clone()).await;
    let queue = BeanstalkClient::connect(addr, Duration::from_secs(2)).await.unwrap();
    let file = template_file();
    let template = ReplicaSetTemplate::from_file(file.path()).unwrap();
    Controller::new(Collector::new(queue), Reconciler::new(store.clone(), template))
}

fn replicas(store: &InMemoryReplicaSets, name: &str) -> Option<u32> {
    store.snapshot(name).and_then(|rs| rs.replicas())
}

#[tokio::test]
async fn first_tick_creates_a_replicaset_per_tube() {
    let tubes = tubes(&[("default", Some(0)), ("emails", Some(34)), ("thumbs", Some(5))]);
    let store = InMemoryReplicaSets::new();
    let ctl = controller(&tubes, &store).await;

    let report = ctl.tick().await.unwrap();
    assert_eq!(
        report,
        TickReport {
            tubes: 3,
            created: 3,
            ..TickReport::default()
        }
    );

    assert_eq!(
        store.names(),
        vec!["consumer-default", "consumer-emails", "consumer-thumbs"]
    );
    assert_eq!(replicas(&store, "consumer-default"), Some(0));
    assert_eq!(replicas(&store, "consumer-emails"), Some(3));
    assert_eq!(replicas(&store, "consumer-thumbs"), Some(1));

    let emails = store.snapshot("consumer-emails").unwrap();
    assert_eq!(emails.tube_binding(), Some("emails"));
    let env = &emails.spec.template.spec.containers[0].env;
    assert_eq!(env[1].value.as_deref(), Some("beanstalkd:11300"));
}

#[tokio::test]
async fn later_ticks_follow_the_backlog() {
    let tubes = tubes(&[("emails", Some(34))]);
    let store = InMemoryReplicaSets::new();
    let ctl = controller(&tubes, &store).await;

    ctl.tick().await.unwrap();

    tubes.lock().unwrap().insert("emails".to_string(), Some(250));
    let report = ctl.tick().await.unwrap();
    assert_eq!(report.updated, 1);
    assert_eq!(replicas(&store, "consumer-emails"), Some(25));

    tubes.lock().unwrap().insert("emails".to_string(), Some(0));
    ctl.tick().await.unwrap();
    assert_eq!(replicas(&store, "consumer-emails"), Some(0));

    let writes = store.writes();
    let report = ctl.tick().await.unwrap();
    assert_eq!(report.unchanged, 1);
    assert_eq!(store.writes(), writes);
}

#[tokio::test]
async fn vanished_tube_is_skipped() {
    let tubes = tubes(&[("emails", Some(12)), ("gone", None)]);
    let store = InMemoryReplicaSets::new();
    let ctl = controller(&tubes, &store).await;

    let report = ctl.tick().await.unwrap();
    assert_eq!(report.tubes, 2);
    assert_eq!(report.created, 1);
    assert_eq!(report.skipped, 1);
    assert_eq!(store.names(), vec!["consumer-emails"]);
}

#[tokio::test]
async fn replicaset_edited_by_someone_else_is_scaled_back() {
    let tubes = tubes(&[("emails", Some(40))]);
    let store = InMemoryReplicaSets::new();
    let ctl = controller(&tubes, &store).await;

    ctl.tick().await.unwrap();
    store.modify("consumer-emails", |rs| rs.set_replicas(9));

    ctl.tick().await.unwrap();
    assert_eq!(replicas(&store, "consumer-emails"), Some(4));
}

#[tokio::test]
async fn run_converges_new_tubes_and_stops_on_shutdown() {
    let tubes = tubes(&[("emails", Some(20))]);
    let store = InMemoryReplicaSets::new();
    let ctl = Arc::new(controller(&tubes, &store).await);

    let (tx, rx) = watch::channel(false);
    let handle = tokio::spawn({
        let ctl = ctl.clone();
        async move { ctl.run(Duration::from_millis(20), rx).await }
    });

    tokio::time::sleep(Duration::from_millis(60)).await;
    tubes.lock().unwrap().insert("reports".to_string(), Some(7));

    tokio::time::timeout(Duration::from_secs(5), async {
        while store.snapshot("consumer-reports").is_none() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();

    tx.send(true).unwrap();
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .unwrap()
        .unwrap();

    assert_eq!(replicas(&store, "consumer-emails"), Some(2));
    assert_eq!(replicas(&store, "consumer-reports"), Some(1));
}

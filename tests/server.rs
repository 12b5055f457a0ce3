use std::fs;

mod support;

use tokio::net::TcpStream;
use tokio::time::timeout;

use fget::config::{ClientConfig, ServerConfig};
use fget::protocol::codec::{CommandCode, Message, StatusCode};
use fget::protocol::transfer::TransferAborted;
use fget::protocol::wire::MessageStream;
use fget::replica::{ReplicaError, ReplicaId};

use support::{assert_converged, snapshot, test_content, TestServer, TEST_TIMEOUT};

/// Sends one raw command and returns the first answer
async fn raw_command(server: &TestServer, code: CommandCode, args: &str) -> Message {
    let socket = TcpStream::connect(&server.addr).await.expect("connect");
    let mut stream = MessageStream::new(socket, 2000, 1000);
    stream.send(&Message::new(code, args)).await.expect("send command");
    timeout(TEST_TIMEOUT, stream.recv()).await.expect("answer in time").expect("answer")
}

#[tokio::test]
async fn put_then_get_in_1900_byte_chunks() {
    let server = TestServer::start().await;
    let client = server.client_with(ClientConfig::default().with_chunk_size(1900));
    let content = test_content(5000);
    fs::write(server.local_path("a.txt"), &content).expect("write local");

    let reply = client.put("a.txt", "a.txt").await.expect("put");
    assert!(reply.is_ok(), "{reply:?}");
    assert_eq!(reply.bytes, 5000);
    for id in ReplicaId::ALL {
        let stored = fs::read(server.replica_root(id).join("a.txt")).expect("stored");
        assert_eq!(stored, content, "content on {id}");
    }

    let reply = client.get("a.txt", "copy.txt").await.expect("get");
    assert!(reply.is_ok(), "{reply:?}");
    assert_eq!(reply.bytes, 5000);
    assert_eq!(fs::read(server.local_path("copy.txt")).expect("downloaded"), content);
}

#[tokio::test]
async fn round_trip_for_small_and_maximal_chunks() {
    for chunk_size in [1, 17, 1999] {
        let server = TestServer::start_with(ServerConfig::default().with_chunk_size(chunk_size)).await;
        let client = server.client_with(ClientConfig::default().with_chunk_size(chunk_size));
        let content = test_content(if chunk_size == 1 { 300 } else { 4321 });
        fs::write(server.local_path("in.bin"), &content).expect("write local");

        let reply = client.put("in.bin", "stored.bin").await.expect("put");
        assert!(reply.is_ok(), "chunk size {chunk_size}: {reply:?}");
        let reply = client.get("stored.bin", "out.bin").await.expect("get");
        assert!(reply.is_ok(), "chunk size {chunk_size}: {reply:?}");
        assert_eq!(fs::read(server.local_path("out.bin")).expect("read"), content);
        assert_converged(&server);
    }
}

#[tokio::test]
async fn empty_file_round_trip() {
    let server = TestServer::start().await;
    let client = server.client();
    fs::write(server.local_path("empty"), b"").expect("write local");

    assert!(client.put("empty", "empty").await.expect("put").is_ok());
    let reply = client.get("empty", "empty.copy").await.expect("get");
    assert!(reply.is_ok());
    assert_eq!(reply.bytes, 0);
    assert!(fs::read(server.local_path("empty.copy")).expect("read").is_empty());
}

#[tokio::test]
async fn info_on_directory() {
    let server = TestServer::start().await;
    let client = server.client();
    assert!(client.make_dir("folder").await.expect("md").is_ok());

    let reply = client.info("folder").await.expect("info");
    assert_eq!(reply.status, StatusCode::Ok);
    assert!(reply.message.contains("Path: folder"), "{}", reply.message);
    assert!(reply.message.contains("Type: directory"), "{}", reply.message);
    assert!(reply.message.contains("File size:"), "{}", reply.message);
    assert_eq!(reply.message.lines().filter(|l| l.starts_with("Last ")).count(), 2);
    for line in reply.message.lines().filter(|l| l.starts_with("Last ")) {
        // ctime layout: "Thu Oct 16 09:03:27 2026"
        let (_, stamp) = line.split_once(": ").expect("label");
        assert_eq!(stamp.split_whitespace().count(), 5, "{line}");
    }
}

#[tokio::test]
async fn info_on_file_reports_size() {
    let server = TestServer::start().await;
    let client = server.client();
    fs::write(server.local_path("f"), test_content(1234)).expect("write local");
    client.put("f", "f").await.expect("put");

    let reply = client.info("f").await.expect("info");
    assert!(reply.is_ok());
    assert!(reply.message.contains("File size: 1234 bytes"), "{}", reply.message);
    assert!(reply.message.contains("Type: file"), "{}", reply.message);

    let missing = client.info("nope").await.expect("info");
    assert_eq!(missing.status, StatusCode::NotFound);
}

#[tokio::test]
async fn remove_missing_path_changes_nothing() {
    let server = TestServer::start().await;
    let client = server.client();
    client.make_dir("keep").await.expect("md");
    let before = snapshot(&server.replica_root(ReplicaId::First));

    let reply = client.remove("ghost.txt").await.expect("rm");
    assert_eq!(reply.status, StatusCode::NotFound);
    assert_eq!(snapshot(&server.replica_root(ReplicaId::First)), before);
    assert_converged(&server);
}

#[tokio::test]
async fn make_dir_twice() {
    let server = TestServer::start().await;
    let client = server.client();
    fs::write(server.local_path("x"), b"inside").expect("write local");

    assert_eq!(client.make_dir("newFolder").await.expect("md").status, StatusCode::Ok);
    client.put("x", "newFolder/x").await.expect("put");
    let second = client.make_dir("newFolder").await.expect("md");
    assert_eq!(second.status, StatusCode::NotAcceptable);
    for id in ReplicaId::ALL {
        let kept = fs::read(server.replica_root(id).join("newFolder/x")).expect("untouched");
        assert_eq!(kept, b"inside");
    }
}

#[tokio::test]
async fn make_dir_needs_parent() {
    let server = TestServer::start().await;
    let reply = server.client().make_dir("a/b").await.expect("md");
    assert_eq!(reply.status, StatusCode::NotAcceptable);
    assert_converged(&server);
}

#[tokio::test]
async fn remove_file_and_tree() {
    let server = TestServer::start().await;
    let client = server.client();
    fs::write(server.local_path("f"), b"data").expect("write local");
    client.make_dir("tree").await.expect("md");
    client.make_dir("tree/sub").await.expect("md");
    client.put("f", "tree/sub/f").await.expect("put");
    client.put("f", "top").await.expect("put");

    assert!(client.remove("top").await.expect("rm file").is_ok());
    assert!(client.remove("tree").await.expect("rm tree").is_ok());
    for id in ReplicaId::ALL {
        assert!(snapshot(&server.replica_root(id)).is_empty(), "{id} not empty");
    }
}

#[tokio::test]
async fn get_refuses_missing_files_and_directories() {
    let server = TestServer::start().await;
    let client = server.client();

    let missing = client.get("nothing.txt", "nothing.txt").await.expect("get");
    assert_eq!(missing.status, StatusCode::NotFound);
    assert!(!server.local_path("nothing.txt").exists(), "no local file before S:200");

    client.make_dir("dir").await.expect("md");
    let dir = client.get("dir", "dir.txt").await.expect("get");
    assert_eq!(dir.status, StatusCode::NotAcceptable);
}

#[tokio::test]
async fn put_into_missing_folder() {
    let server = TestServer::start().await;
    let client = server.client();
    fs::write(server.local_path("f"), b"data").expect("write local");

    let reply = client.put("f", "no/such/place").await.expect("put");
    assert_eq!(reply.status, StatusCode::NotFound);
    assert_converged(&server);
}

#[tokio::test]
async fn put_without_local_file_fails_locally() {
    let server = TestServer::start().await;
    assert!(server.client().put("missing", "missing").await.is_err());
}

#[tokio::test]
async fn malformed_commands_are_rejected() {
    let server = TestServer::start().await;

    let answer = raw_command(&server, CommandCode::Info, "").await;
    assert_eq!(answer.status(), Some(StatusCode::NotFound));
    assert_eq!(answer.text(), "Invalid command");

    let answer = raw_command(&server, CommandCode::Remove, "a b").await;
    assert_eq!(answer.status(), Some(StatusCode::NotFound));

    let answer = raw_command(&server, CommandCode::MakeDir, "../escape").await;
    assert_eq!(answer.status(), Some(StatusCode::NotAcceptable));
    assert_eq!(answer.text(), "Invalid path");
    assert!(!server.storage.path().join("escape").exists());

    // `a/..` names the replica root itself
    let answer = raw_command(&server, CommandCode::MakeDir, "a").await;
    assert_eq!(answer.status(), Some(StatusCode::Ok));
    let answer = raw_command(&server, CommandCode::Remove, "a/..").await;
    assert_eq!(answer.status(), Some(StatusCode::NotAcceptable));
    assert_eq!(answer.text(), "Invalid path");
    for id in ReplicaId::ALL {
        assert!(server.replica_root(id).join("a").is_dir(), "root of {id} survived");
    }

    // a status where a command belongs
    let socket = TcpStream::connect(&server.addr).await.expect("connect");
    let mut stream = MessageStream::new(socket, 2000, 1000);
    stream.send_text(StatusCode::Ok, "hello").await.expect("send");
    let answer = stream.recv().await.expect("answer");
    assert_eq!(answer.status(), Some(StatusCode::NotFound));
}

#[tokio::test]
async fn client_checks_commands_before_connecting() {
    let server = TestServer::start().await;
    let client = server.client();
    assert!(client.make_dir("/abs").await.is_err());
    assert!(client.remove(".hidden").await.is_err());
    assert!(client.info("").await.is_err());
    assert!(client.make_dir("two words").await.is_err());
}

#[tokio::test]
async fn quit_gets_no_answer() {
    let server = TestServer::start().await;
    server.client().quit().await.expect("quit");

    let socket = TcpStream::connect(&server.addr).await.expect("connect");
    let mut stream = MessageStream::new(socket, 2000, 1000);
    stream.send(&Message::new(CommandCode::Quit, "")).await.expect("send");
    let closed = timeout(TEST_TIMEOUT, stream.recv()).await.expect("closed in time");
    assert!(closed.is_err(), "server must close without answering");
}

#[tokio::test]
async fn concurrent_puts_leave_one_whole_version() {
    let server = TestServer::start().await;
    let one = test_content(30_000);
    let two: Vec<u8> = one.iter().map(|b| b.wrapping_add(1)).collect();
    fs::write(server.local_path("one"), &one).expect("write local");
    fs::write(server.local_path("two"), &two).expect("write local");

    let client = server.client_with(ClientConfig::default().with_chunk_size(100));
    let (a, b) = tokio::join!(client.put("one", "shared"), client.put("two", "shared"));
    assert!(a.expect("put one").is_ok());
    assert!(b.expect("put two").is_ok());

    let stored = fs::read(server.replica_root(ReplicaId::First).join("shared")).expect("stored");
    assert!(stored == one || stored == two, "interleaved content");
    assert_converged(&server);
}

#[tokio::test]
async fn concurrent_gets_are_served() {
    let server = TestServer::start().await;
    let client = server.client_with(ClientConfig::default().with_chunk_size(500));
    let content = test_content(20_000);
    fs::write(server.local_path("src"), &content).expect("write local");
    client.put("src", "shared").await.expect("put");

    let (a, b, c) = tokio::join!(
        client.get("shared", "a"),
        client.get("shared", "b"),
        client.get("shared", "c")
    );
    for (reply, name) in [(a, "a"), (b, "b"), (c, "c")] {
        assert!(reply.expect("get").is_ok());
        assert_eq!(fs::read(server.local_path(name)).expect("read"), content);
    }
}

#[tokio::test]
async fn replicas_converge_after_mixed_operations() {
    let server = TestServer::start().await;
    let client = server.client();
    fs::write(server.local_path("f"), test_content(2500)).expect("write local");

    client.make_dir("d").await.expect("md");
    client.make_dir("d/e").await.expect("md");
    client.put("f", "d/e/f1").await.expect("put");
    client.put("f", "d/f2").await.expect("put");
    client.put("f", "f3").await.expect("put");
    client.remove("d/e").await.expect("rm");
    client.make_dir("d").await.expect("md again");
    client.remove("missing").await.expect("rm missing");

    assert_converged(&server);
    let names: Vec<String> = snapshot(&server.replica_root(ReplicaId::Second))
        .into_iter()
        .map(|(path, _)| path.to_string_lossy().into_owned())
        .collect();
    assert_eq!(names.len(), 3, "{names:?}");
}

#[tokio::test]
async fn degraded_writes_reach_the_returning_replica() {
    let server = TestServer::start().await;
    let client = server.client();
    fs::write(server.local_path("f"), b"written while degraded").expect("write local");
    let second = server.replica_root(ReplicaId::Second);

    fs::remove_dir_all(&second).expect("remove root_2");
    assert!(client.put("f", "late.txt").await.expect("put").is_ok());
    assert!(client.make_dir("late_dir").await.expect("md").is_ok());
    assert!(!second.exists());

    fs::create_dir(&second).expect("recreate root_2");
    assert!(client.info("late.txt").await.expect("info").is_ok());
    assert_converged(&server);
    assert_eq!(fs::read(second.join("late.txt")).expect("read"), b"written while degraded");
}

#[tokio::test]
async fn losing_all_storage_stops_the_server() {
    let mut server = TestServer::start().await;
    for id in ReplicaId::ALL {
        fs::remove_dir_all(server.replica_root(id)).expect("remove");
    }

    let reply = server.client().info("anything").await.expect("info");
    assert_eq!(reply.status, StatusCode::Aborted);

    let task = server.task.take().expect("server task");
    let result = timeout(TEST_TIMEOUT, task).await.expect("server stopped").expect("join");
    let err = result.expect_err("server must fail");
    assert_eq!(err.downcast_ref::<ReplicaError>(), Some(&ReplicaError::Unavailable));
}

#[tokio::test]
async fn remove_refuses_replicas_that_disagree_on_type() {
    let server = TestServer::start().await;
    let client = server.client();
    fs::create_dir(server.replica_root(ReplicaId::First).join("x")).expect("dir on root_1");
    fs::write(server.replica_root(ReplicaId::Second).join("x"), b"file").expect("file on root_2");

    let reply = client.remove("x").await.expect("rm");
    assert_eq!(reply.status, StatusCode::NotAcceptable);
    assert_eq!(reply.message, "Replicas disagree on type");
    assert!(server.replica_root(ReplicaId::First).join("x").is_dir());
    assert!(server.replica_root(ReplicaId::Second).join("x").is_file());
}

#[cfg(unix)]
#[tokio::test]
async fn failed_open_keeps_the_previous_version() {
    let server = TestServer::start().await;
    let client = server.client();
    fs::write(server.local_path("v1"), b"v1").expect("write local");
    fs::write(server.local_path("v2"), b"v2").expect("write local");
    assert!(client.put("v1", "doc").await.expect("put v1").is_ok());

    // root_2 now points into a folder that does not exist, so opening it fails
    let second = server.replica_root(ReplicaId::Second).join("doc");
    fs::remove_file(&second).expect("remove root_2 copy");
    let dangling = server.storage.path().join("missing_dir").join("target");
    std::os::unix::fs::symlink(&dangling, &second).expect("symlink");

    let reply = client.put("v2", "doc").await.expect("put v2");
    assert_eq!(reply.status, StatusCode::NotFound);
    let first = fs::read(server.replica_root(ReplicaId::First).join("doc")).expect("root_1 copy");
    assert_eq!(first, b"v1");
}

#[cfg(target_os = "linux")]
#[tokio::test]
async fn put_reports_the_replica_that_missed_content() {
    let server = TestServer::start().await;
    let client = server.client();
    let content = test_content(5000);
    fs::write(server.local_path("big"), &content).expect("write local");
    std::os::unix::fs::symlink("/dev/full", server.replica_root(ReplicaId::Second).join("doc"))
        .expect("symlink");

    let reply = client.put("big", "doc").await.expect("put");
    assert_eq!(reply.status, StatusCode::NotAcceptable);
    assert_eq!(reply.message, "File not stored on root_2");
    assert_eq!(reply.bytes, 5000);
    let first = fs::read(server.replica_root(ReplicaId::First).join("doc")).expect("root_1 copy");
    assert_eq!(first, content);
}

#[cfg(target_os = "linux")]
#[tokio::test]
async fn put_aborts_when_no_replica_can_write() {
    let server = TestServer::start().await;
    let client = server.client();
    fs::write(server.local_path("big"), test_content(5000)).expect("write local");
    for id in ReplicaId::ALL {
        std::os::unix::fs::symlink("/dev/full", server.replica_root(id).join("doc"))
            .expect("symlink");
    }

    let err = timeout(TEST_TIMEOUT, client.put("big", "doc"))
        .await
        .expect("put in time")
        .expect_err("nothing was stored");
    let aborted = err.downcast_ref::<TransferAborted>().expect("aborted transfer");
    assert!(aborted.to_string().contains("Could not write file"), "{aborted}");
}

use std::hint::black_box;
use std::time::Instant;

use criterion::{criterion_group, criterion_main, Criterion};
use tandem_collab::authority::Authority;
use tandem_collab::broadcast::BroadcastGroup;
use tandem_collab::journal::Journal;
use tandem_collab::presence::LocalPresence;
use tandem_collab::protocol::{OutgoingOp, SequencedOp, ServerMessage};
use tandem_collab::replica::Replica;
use tandem_core::{
    Checkpoint, Color, History, LocalOp, Op, PropertyValue, Shape, ShapeKind, ShapeTable, Vec2,
};
use uuid::Uuid;

fn create(id: u64) -> Op {
    Op::create(Shape::new(
        id,
        ShapeKind::Rect,
        Vec2::new(id as f64, id as f64),
        Color::BLACK,
    ))
}

fn sequenced(ops: impl IntoIterator<Item = Op>) -> Vec<SequencedOp> {
    ops.into_iter()
        .enumerate()
        .map(|(i, op)| SequencedOp {
            op: op.with_seq(i as u64 + 1),
            client_id: Some(1),
            client_op_id: Some(Uuid::new_v4()),
        })
        .collect()
}

fn bench_sequence_batch(c: &mut Criterion) {
    let batch: Vec<OutgoingOp> = (1..=100)
        .map(|id| OutgoingOp {
            client_op_id: Uuid::new_v4(),
            op: create(id),
        })
        .collect();

    c.bench_function("authority_sequence_100_creates", |b| {
        b.iter(|| {
            let mut authority = Authority::default();
            let (client_id, _) = authority.connect(None).unwrap();
            black_box(authority.handle_client_ops(client_id, 0, batch.clone(), Instant::now()));
        })
    });
}

fn bench_server_ops_encode(c: &mut Criterion) {
    let msg = ServerMessage::ServerOps {
        ops: sequenced((1..=100).map(create)),
    };

    c.bench_function("server_ops_encode_100", |b| {
        b.iter(|| black_box(black_box(&msg).encode().unwrap()))
    });
}

fn bench_server_ops_decode(c: &mut Criterion) {
    let encoded = ServerMessage::ServerOps {
        ops: sequenced((1..=100).map(create)),
    }
    .encode()
    .unwrap();

    c.bench_function("server_ops_decode_100", |b| {
        b.iter(|| black_box(ServerMessage::decode(black_box(&encoded)).unwrap()))
    });
}

fn bench_broadcast_1000_messages(c: &mut Criterion) {
    let msg = ServerMessage::UserLeft { client_id: 0 };

    c.bench_function("broadcast_1000_msgs_100_peers", |b| {
        b.iter(|| {
            let mut group = BroadcastGroup::new(1024);
            let _outboxes: Vec<_> = (1..=100).map(|id| group.add_peer(id)).collect();
            for _ in 0..1000 {
                black_box(group.broadcast(&msg, None).unwrap());
            }
        })
    });
}

fn bench_replica_rebase(c: &mut Criterion) {
    let mut replica = Replica::default();
    replica.on_welcome(
        1,
        1_000_000,
        Checkpoint::default(),
        sequenced((1..=500).map(create)),
    );
    for local_seq in 1..=50 {
        let op = Op::change(
            local_seq,
            PropertyValue::Rotation(0.0),
            PropertyValue::Rotation(local_seq as f64),
        )
        .unwrap();
        replica.submit(LocalOp { local_seq, op });
    }

    c.bench_function("replica_rebase_500_authoritative_50_pending", |b| {
        b.iter(|| {
            replica.rebase();
            black_box(replica.document().len());
        })
    });
}

fn bench_journal_replay(c: &mut Criterion) {
    let mut journal = Journal::new(1000);
    for entry in sequenced((1..=500).map(create)) {
        journal.append(entry);
    }

    c.bench_function("journal_replay_500", |b| {
        b.iter(|| black_box(journal.replay().len()))
    });
}

fn bench_checkpoint_capture(c: &mut Criterion) {
    let table: ShapeTable = (1..=1000)
        .map(|id| Shape::new(id, ShapeKind::Ellipse, Vec2::ZERO, Color::BLACK))
        .collect();

    c.bench_function("checkpoint_capture_1000_shapes", |b| {
        b.iter(|| black_box(Checkpoint::capture(1000, black_box(&table))))
    });
}

fn bench_history_undo(c: &mut Criterion) {
    let table: ShapeTable = (1..=100)
        .map(|id| Shape::new(id, ShapeKind::Rect, Vec2::ZERO, Color::BLACK))
        .collect();

    c.bench_function("history_commit_undo_100", |b| {
        b.iter(|| {
            let mut history = History::default();
            for id in 1..=100 {
                let op = Op::change(
                    id,
                    PropertyValue::Rotation(0.0),
                    PropertyValue::Rotation(1.0),
                )
                .unwrap();
                history.push(op);
                history.commit();
            }
            while let Some(batch) = history.undo(&table) {
                black_box(batch);
            }
        })
    });
}

fn bench_cursor_throttle(c: &mut Criterion) {
    c.bench_function("cursor_throttle_1000_updates", |b| {
        b.iter(|| {
            let mut presence = LocalPresence::default();
            let now = Instant::now();
            for i in 0..1000 {
                black_box(presence.update_cursor(Some(Vec2::new(i as f64, 0.0)), now));
            }
            black_box(presence.poll(now));
        })
    });
}

criterion_group!(
    benches,
    bench_sequence_batch,
    bench_server_ops_encode,
    bench_server_ops_decode,
    bench_broadcast_1000_messages,
    bench_replica_rebase,
    bench_journal_replay,
    bench_checkpoint_capture,
    bench_history_undo,
    bench_cursor_throttle,
);
criterion_main!(benches);

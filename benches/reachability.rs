use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};

use application_access::{AccessManager, LeafId, NonLeafId};

/// Build a graph of `group_count` groups chained one after another
/// (group_i -> group_{i+1}), with `users_per_group` users mapped into
/// every group, and ask reachability questions from the leaf end.
fn build_chain(group_count: usize, users_per_group: usize) -> AccessManager {
    let mut am = AccessManager::new();
    let groups: Vec<NonLeafId> = (0..group_count).map(|i| NonLeafId::from(format!("g{i}"))).collect();

    for g in &groups {
        am.add_group(g.clone()).unwrap();
    }
    for pair in groups.windows(2) {
        am.add_group_to_group_mapping(&pair[0], &pair[1]).unwrap();
    }

    am.add_group_component_access(groups.last().unwrap(), "Settings".into(), "Write".into())
        .unwrap();

    for g in &groups {
        for u in 0..users_per_group {
            let user = LeafId::from(format!("{g}-u{u}"));
            am.add_user(user.clone()).unwrap();
            am.add_user_to_group_mapping(&user, g).unwrap();
        }
    }

    am
}

fn bench_has_access(c: &mut Criterion) {
    let mut group = c.benchmark_group("has_access_to_application_component");
    for depth in [4usize, 16, 64] {
        let am = build_chain(depth, 8);
        let user = LeafId::from("g0-u0");
        group.bench_with_input(BenchmarkId::from_parameter(depth), &depth, |b, _| {
            b.iter(|| am.has_access_to_application_component(&user, &"Settings".into(), &"Write".into()))
        });
    }
    group.finish();
}

fn bench_accessible_entities(c: &mut Criterion) {
    let mut am = AccessManager::new();
    am.add_user(LeafId::from("alice")).unwrap();
    am.add_group(NonLeafId::from("team")).unwrap();
    am.add_user_to_group_mapping(&LeafId::from("alice"), &NonLeafId::from("team")).unwrap();
    am.add_entity_type("Document".into()).unwrap();

    for i in 0..500 {
        let entity = format!("doc{i}").into();
        am.add_entity(&"Document".into(), entity).ok();
        let entity = format!("doc{i}").into();
        am.add_group_to_entity_mapping(&NonLeafId::from("team"), &"Document".into(), &entity)
            .ok();
    }

    c.bench_function("get_accessible_entities_500", |b| {
        b.iter(|| am.get_accessible_entities(&LeafId::from("alice"), &"Document".into()).unwrap())
    });
}

criterion_group!(benches, bench_has_access, bench_accessible_entities);
criterion_main!(benches);

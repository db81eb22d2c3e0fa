use super::{profile, text, user};
use crate::badge::{self, BadgeAggregator};
use crate::config::CoreConfig;
use crate::conversation::LoadState;
use crate::notify::RecordingNotifier;
use crate::profiles::ProfileCache;
use crate::roster::{derive_unread, ContactSummary, Roster, RosterInsert};
use crate::storage::MemorySessionStorage;
use crate::watermark::ReadWatermarks;
use murmur_api::Message;
use std::sync::Arc;

const NOW: u64 = 10_000;

fn watermarks() -> ReadWatermarks {
    ReadWatermarks::new(Arc::new(MemorySessionStorage::new()))
}

fn summary(peer: &str, latest: Option<Message>, raw_unread: u64) -> ContactSummary {
    ContactSummary {
        profile: profile(peer, &peer.to_uppercase()),
        latest,
        raw_unread,
    }
}

fn roster_with(summaries: Vec<ContactSummary>, marks: &ReadWatermarks) -> Roster {
    let mut roster = Roster::new(user("alice"), &CoreConfig::default());
    let generation = roster.begin_refresh();
    assert!(roster.apply_refresh(generation, summaries, marks));
    roster
}

fn order(roster: &Roster) -> Vec<String> {
    roster
        .entries()
        .iter()
        .map(|e| e.peer.id.value.clone())
        .collect()
}

fn unread(roster: &Roster, peer: &str) -> u32 {
    roster.entry(&user(peer)).map(|e| e.unread_count).unwrap_or(0)
}

#[test]
fn derived_unread_follows_last_sender_and_watermark() {
    let alice = user("alice");
    let from_bob = text("m1", "bob", "alice", "hi", 100);
    let from_alice = text("m2", "alice", "bob", "yo", 100);
    assert_eq!(derive_unread(&alice, None, 4, 0), 0);
    assert_eq!(derive_unread(&alice, Some(&from_alice), 4, 0), 0);
    assert_eq!(derive_unread(&alice, Some(&from_bob), 4, 100), 0);
    assert_eq!(derive_unread(&alice, Some(&from_bob), 4, 99), 4);
    assert_eq!(derive_unread(&alice, Some(&from_bob), u64::MAX, 0), u32::MAX);
}

#[test]
fn refresh_sorts_newest_first_with_silent_contacts_last() {
    let marks = watermarks();
    marks.set(&user("dave"), 500);
    let roster = roster_with(
        vec![
            summary("quiet", None, 0),
            summary("bob", Some(text("b", "bob", "alice", "old", 100)), 2),
            summary("carol", Some(text("c", "alice", "carol", "mine", 300)), 5),
            summary("dave", Some(text("d", "dave", "alice", "seen", 200)), 1),
        ],
        &marks,
    );
    assert_eq!(order(&roster), vec!["carol", "dave", "bob", "quiet"]);
    assert_eq!(unread(&roster, "bob"), 2);
    assert_eq!(unread(&roster, "carol"), 0);
    assert_eq!(unread(&roster, "dave"), 0);
    assert_eq!(roster.total_unread(), 2);
    assert_eq!(roster.state(), &LoadState::Ready);
}

#[test]
fn refresh_keeps_entries_on_failure_and_never_flashes_loading() {
    let marks = watermarks();
    let mut roster = roster_with(vec![summary("bob", None, 0)], &marks);
    let generation = roster.begin_refresh();
    assert_eq!(roster.state(), &LoadState::Ready);
    assert!(roster.fail_refresh(generation, "offline".to_string()));
    assert_eq!(roster.state(), &LoadState::Ready);
    assert_eq!(roster.entries().len(), 1);

    let mut empty = Roster::new(user("alice"), &CoreConfig::default());
    let generation = empty.begin_refresh();
    assert_eq!(empty.state(), &LoadState::Loading);
    empty.fail_refresh(generation, "offline".to_string());
    assert_eq!(empty.state(), &LoadState::Failed("offline".to_string()));
}

#[test]
fn empty_refresh_is_ready_not_failed() {
    let roster = roster_with(Vec::new(), &watermarks());
    assert_eq!(roster.state(), &LoadState::Ready);
    assert!(roster.entries().is_empty());
    assert_eq!(roster.total_unread(), 0);
}

#[test]
fn superseded_refresh_results_are_dropped() {
    let marks = watermarks();
    let mut roster = Roster::new(user("alice"), &CoreConfig::default());
    let first = roster.begin_refresh();
    let second = roster.begin_refresh();
    assert!(!roster.apply_refresh(first, vec![summary("stale", None, 0)], &marks));
    assert!(!roster.fail_refresh(first, "late".to_string()));
    assert!(roster.apply_refresh(second, vec![summary("bob", None, 0)], &marks));
    assert_eq!(order(&roster), vec!["bob"]);
}

#[test]
fn peer_insert_counts_once_and_moves_to_front() {
    let marks = watermarks();
    let mut roster = roster_with(
        vec![
            summary("carol", Some(text("c", "carol", "alice", "x", 200)), 0),
            summary("bob", Some(text("b", "alice", "bob", "y", 100)), 0),
        ],
        &marks,
    );
    let incoming = text("b2", "bob", "alice", "ping", 300);
    assert_eq!(
        roster.on_insert(&incoming, false, NOW, &marks),
        RosterInsert::Updated { peer: user("bob") }
    );
    assert_eq!(
        roster.on_insert(&incoming, false, NOW, &marks),
        RosterInsert::Duplicate
    );
    assert_eq!(order(&roster), vec!["bob", "carol"]);
    let entry = roster.entry(&user("bob")).expect("bob");
    assert_eq!(entry.unread_count, 1);
    assert_eq!(entry.last_message_preview, "ping");
    assert_eq!(entry.last_message_at, Some(300));
    assert_eq!(roster.total_unread(), 1);
}

#[test]
fn refreshed_latest_is_not_counted_again_when_pushed() {
    let marks = watermarks();
    let latest = text("b", "bob", "alice", "hi", 100);
    let mut roster = roster_with(vec![summary("bob", Some(latest.clone()), 1)], &marks);
    assert_eq!(
        roster.on_insert(&latest, false, NOW, &marks),
        RosterInsert::Duplicate
    );
    assert_eq!(unread(&roster, "bob"), 1);
}

#[test]
fn self_insert_zeroes_and_advances_watermark() {
    let marks = watermarks();
    let mut roster = roster_with(
        vec![summary("bob", Some(text("b", "bob", "alice", "hi", 100)), 3)],
        &marks,
    );
    assert_eq!(unread(&roster, "bob"), 3);
    roster.on_insert(&text("a", "alice", "bob", "reply", 150), false, NOW, &marks);
    assert_eq!(unread(&roster, "bob"), 0);
    assert_eq!(marks.get(&user("bob")), NOW);
    let entry = roster.entry(&user("bob")).expect("bob");
    assert_eq!(entry.last_message_sender, Some(user("alice")));
}

#[test]
fn insert_in_view_does_not_count() {
    let marks = watermarks();
    let mut roster = roster_with(vec![summary("bob", None, 0)], &marks);
    roster.on_insert(&text("b", "bob", "alice", "hi", 400), true, NOW, &marks);
    assert_eq!(unread(&roster, "bob"), 0);
    assert_eq!(marks.get(&user("bob")), 400);
}

#[test]
fn insert_behind_watermark_does_not_count() {
    let marks = watermarks();
    marks.set(&user("bob"), 500);
    let mut roster = roster_with(vec![summary("bob", None, 0)], &marks);
    roster.on_insert(&text("b", "bob", "alice", "late", 400), false, NOW, &marks);
    assert_eq!(unread(&roster, "bob"), 0);
}

#[test]
fn older_insert_keeps_newer_preview_and_position() {
    let marks = watermarks();
    let mut roster = roster_with(
        vec![
            summary("carol", Some(text("c", "carol", "alice", "new", 300)), 0),
            summary("bob", Some(text("b", "bob", "alice", "newest", 200)), 1),
        ],
        &marks,
    );
    roster.on_insert(&text("b0", "bob", "alice", "older", 50), false, NOW, &marks);
    let entry = roster.entry(&user("bob")).expect("bob");
    assert_eq!(entry.last_message_preview, "newest");
    assert_eq!(entry.unread_count, 2);
    assert_eq!(order(&roster), vec!["carol", "bob"]);
}

#[test]
fn unknown_and_unrelated_inserts() {
    let marks = watermarks();
    let mut roster = roster_with(vec![summary("bob", None, 0)], &marks);
    assert_eq!(
        roster.on_insert(&text("z", "zed", "alice", "hey", 1), false, NOW, &marks),
        RosterInsert::UnknownPeer { peer: user("zed") }
    );
    assert_eq!(
        roster.on_insert(&text("q", "bob", "carol", "psst", 1), false, NOW, &marks),
        RosterInsert::Unrelated
    );
}

#[test]
fn read_update_zeroes_independent_of_watermark() {
    let marks = watermarks();
    let mut roster = roster_with(
        vec![summary("bob", Some(text("b2", "bob", "alice", "two", 200)), 2)],
        &marks,
    );
    let mut read = text("b1", "bob", "alice", "one", 100);
    read.read = true;
    assert!(roster.on_read_update(&read, &marks));
    assert_eq!(unread(&roster, "bob"), 0);
    assert_eq!(marks.get(&user("bob")), 200);
    assert!(!roster.on_read_update(&read, &marks));

    let mut outgoing = text("a1", "alice", "bob", "mine", 300);
    outgoing.read = true;
    assert!(!roster.on_read_update(&outgoing, &marks));
}

#[test]
fn opening_zeroes_and_advances_watermark() {
    let marks = watermarks();
    let mut roster = roster_with(
        vec![summary("bob", Some(text("b", "bob", "alice", "x", 100)), 3)],
        &marks,
    );
    assert!(roster.on_conversation_opened(&user("bob"), NOW, &marks));
    assert_eq!(unread(&roster, "bob"), 0);
    assert_eq!(marks.get(&user("bob")), NOW);
    assert!(!roster.on_conversation_opened(&user("bob"), NOW - 1, &marks));
    assert_eq!(marks.get(&user("bob")), NOW);
}

#[test]
fn unread_invariant_holds_for_every_delivery_order() {
    let mut read_b1 = text("b1", "bob", "alice", "one", 100);
    read_b1.read = true;
    let events = vec![
        ("insert", text("b1", "bob", "alice", "one", 100)),
        ("insert", text("b2", "bob", "alice", "two", 200)),
        ("insert", text("a1", "alice", "bob", "mine", 150)),
        ("update", read_b1),
        ("insert", text("b2", "bob", "alice", "two", 200)),
    ];
    let mut indices: Vec<usize> = (0..events.len()).collect();
    let mut orders = Vec::new();
    permutations(&mut indices, 0, &mut orders);
    assert_eq!(orders.len(), 120);

    for order in orders {
        let marks = watermarks();
        let mut roster = roster_with(vec![summary("bob", None, 0)], &marks);
        for index in order.iter() {
            let (kind, message) = &events[*index];
            match *kind {
                "insert" => {
                    roster.on_insert(message, false, NOW, &marks);
                }
                _ => {
                    roster.on_read_update(message, &marks);
                }
            }
        }
        let entry = roster.entry(&user("bob")).expect("bob");
        let self_authored = entry.last_message_sender == Some(user("alice"));
        let covered = entry
            .last_message_at
            .map_or(true, |at| at <= marks.get(&user("bob")));
        assert_eq!(
            entry.unread_count == 0,
            self_authored || covered,
            "order {:?} left {:?}",
            order,
            entry
        );
    }
}

fn permutations(items: &mut Vec<usize>, k: usize, out: &mut Vec<Vec<usize>>) {
    if k == items.len() {
        out.push(items.clone());
        return;
    }
    for i in k..items.len() {
        items.swap(k, i);
        permutations(items, k + 1, out);
        items.swap(k, i);
    }
}

#[test]
fn search_matches_name_or_account() {
    let marks = watermarks();
    let roster = roster_with(
        vec![
            ContactSummary {
                profile: profile("bob", "Bob Stone"),
                latest: None,
                raw_unread: 0,
            },
            ContactSummary {
                profile: profile("carol", "Carol King"),
                latest: None,
                raw_unread: 0,
            },
        ],
        &marks,
    );
    let names = |query: &str| -> Vec<String> {
        roster
            .search(query)
            .into_iter()
            .map(|e| e.peer.id.value)
            .collect()
    };
    assert_eq!(names("stone"), vec!["bob"]);
    assert_eq!(names("@car"), vec!["carol"]);
    assert_eq!(names("  ").len(), 2);
    assert!(names("nobody").is_empty());
}

#[test]
fn profile_cache_evicts_least_recent() {
    let mut cache = ProfileCache::new(2);
    cache.insert(profile("bob", "Bob"));
    cache.insert(profile("carol", "Carol"));
    assert!(cache.get(&user("bob")).is_some());
    cache.insert(profile("dave", "Dave"));
    assert_eq!(cache.len(), 2);
    assert!(cache.get(&user("carol")).is_none());
    assert!(cache.get(&user("bob")).is_some());
    assert_eq!(ProfileCache::new(0).capacity(), 1);
}

#[test]
fn roster_profile_cache_is_bounded_by_config() {
    let marks = watermarks();
    let config = CoreConfig {
        profile_cache_capacity: 2,
        ..CoreConfig::default()
    };
    let mut roster = Roster::new(user("alice"), &config);
    let generation = roster.begin_refresh();
    roster.apply_refresh(
        generation,
        vec![
            summary("bob", None, 0),
            summary("carol", None, 0),
            summary("dave", None, 0),
        ],
        &marks,
    );
    assert_eq!(roster.profile_cache().len(), 2);
    assert_eq!(roster.entries().len(), 3);
}

#[test]
fn badge_projects_sum_or_clears() {
    let marks = watermarks();
    let notifier = RecordingNotifier::new();
    let aggregator = BadgeAggregator::new(Arc::new(notifier.clone()));
    let mut roster = roster_with(
        vec![
            summary("bob", Some(text("b", "bob", "alice", "x", 100)), 2),
            summary("carol", Some(text("c", "carol", "alice", "y", 90)), 3),
        ],
        &marks,
    );
    assert_eq!(badge::total(roster.entries()), 5);
    assert_eq!(aggregator.project(roster.entries()), 5);
    assert_eq!(notifier.badge(), Some(5));

    roster.on_conversation_opened(&user("bob"), NOW, &marks);
    roster.on_conversation_opened(&user("carol"), NOW, &marks);
    assert_eq!(aggregator.project(roster.entries()), 0);
    assert_eq!(notifier.badge(), None);
    assert_eq!(notifier.snapshot().badge_calls, 2);
}

#[test]
fn refresh_snapshot_does_not_erase_inserts_it_missed() {
    let marks = watermarks();
    let old = text("m1", "bob", "alice", "old", 100);
    let mut roster = roster_with(vec![summary("bob", Some(old.clone()), 0)], &marks);

    let generation = roster.begin_refresh();
    let new = text("m2", "bob", "alice", "new", 200);
    assert!(matches!(
        roster.on_insert(&new, false, NOW, &marks),
        RosterInsert::Updated { .. }
    ));
    assert_eq!(unread(&roster, "bob"), 1);

    assert!(roster.apply_refresh(generation, vec![summary("bob", Some(old), 0)], &marks));
    let entry = roster.entry(&user("bob")).expect("bob");
    assert_eq!(entry.unread_count, 1);
    assert_eq!(entry.last_message_preview, "new");
    assert_eq!(entry.last_message_at, Some(200));
    assert_eq!(roster.on_insert(&new, false, NOW, &marks), RosterInsert::Duplicate);
    assert_eq!(roster.total_unread(), 1);
}

#[test]
fn refresh_snapshot_that_saw_the_insert_counts_it_once() {
    let marks = watermarks();
    let old = text("m1", "bob", "alice", "old", 100);
    let mut roster = roster_with(vec![summary("bob", Some(old), 0)], &marks);

    let generation = roster.begin_refresh();
    let new = text("m2", "bob", "alice", "new", 200);
    roster.on_insert(&new, false, NOW, &marks);
    assert!(roster.apply_refresh(generation, vec![summary("bob", Some(new), 1)], &marks));
    assert_eq!(unread(&roster, "bob"), 1);
}

#[test]
fn own_insert_during_refresh_stays_read() {
    let marks = watermarks();
    let old = text("m1", "bob", "alice", "old", 100);
    let mut roster = roster_with(vec![summary("bob", Some(old.clone()), 3)], &marks);
    assert_eq!(unread(&roster, "bob"), 3);

    let generation = roster.begin_refresh();
    let mine = text("m2", "alice", "bob", "reply", 200);
    roster.on_insert(&mine, false, NOW, &marks);
    assert!(roster.apply_refresh(generation, vec![summary("bob", Some(old), 3)], &marks));
    let entry = roster.entry(&user("bob")).expect("bob");
    assert_eq!(entry.unread_count, 0);
    assert_eq!(entry.last_message_preview, "reply");
}

#[test]
fn inserts_before_a_newer_refresh_are_not_replayed() {
    let marks = watermarks();
    let old = text("m1", "bob", "alice", "old", 100);
    let mut roster = roster_with(vec![summary("bob", Some(old), 0)], &marks);

    let first = roster.begin_refresh();
    let new = text("m2", "bob", "alice", "new", 200);
    roster.on_insert(&new, false, NOW, &marks);
    let second = roster.begin_refresh();
    assert!(!roster.apply_refresh(first, Vec::new(), &marks));
    assert!(roster.apply_refresh(second, vec![summary("bob", Some(new), 1)], &marks));
    assert_eq!(unread(&roster, "bob"), 1);
    assert_eq!(roster.total_unread(), 1);
}

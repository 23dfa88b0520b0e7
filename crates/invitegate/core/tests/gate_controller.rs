mod common;

use common::{actor, join_event, Harness, ADMIN, BOT, GROUP};
use invitegate_core::{
    messages, ChatScope, ControlPayload, InboundEvent, MemberPermissions, MessageEvent,
    MessageHandle,
};
use invitegate_storage::{
    AdminAuditStore, GroupSettingsStore, MembershipStore, MessageId, QueryWindow, UserId,
};

#[tokio::test]
async fn replayed_join_creates_once_and_prompts_once() {
    let h = Harness::new();
    h.self_join(10).await;
    h.self_join(10).await;

    let membership = h.store.get_membership(UserId(10), GROUP).await.unwrap().unwrap();
    assert!(membership.is_restricted);
    assert_eq!(membership.invited_count, 0);
    assert_eq!(h.gateway.permissions_for(UserId(10)), vec![MemberPermissions::muted()]);

    let prompts = h.gateway.live_prompts_for(UserId(10));
    assert_eq!(prompts.len(), 1);
    assert_eq!(membership.welcome_message_id, Some(prompts[0].message_id));
    assert!(h.gateway.sent_to_group()[0].text.contains("Still needed: 5"));
}

#[tokio::test]
async fn bot_join_creates_default_settings() {
    let h = Harness::new();
    h.dispatch(InboundEvent::Membership(join_event(BOT.0, BOT.0)))
        .await;

    let settings = h.store.get_settings(GROUP).await.unwrap().unwrap();
    assert_eq!(settings.required_users, 5);
    assert!(h.store.get_membership(BOT, GROUP).await.unwrap().is_none());
    assert!(h.gateway.calls().is_empty());
}

#[tokio::test]
async fn self_join_and_invited_join_diverge() {
    let h = Harness::new();
    h.self_join(10).await;
    h.invite(10, 11).await;

    let invited = h.store.get_membership(UserId(11), GROUP).await.unwrap().unwrap();
    assert!(invited.is_restricted);
    assert_eq!(invited.inviter_id, Some(UserId(10)));
    assert!(h.gateway.permissions_for(UserId(11)).is_empty());
    assert!(h.gateway.live_prompts_for(UserId(11)).is_empty());

    // The inviter's prompt showed a stale count and was retired.
    assert!(h.gateway.live_prompts_for(UserId(10)).is_empty());
    let inviter = h.store.get_membership(UserId(10), GROUP).await.unwrap().unwrap();
    assert_eq!(inviter.invited_count, 1);
    assert_eq!(inviter.welcome_message_id, None);

    // First message from the invited user is deleted and prompted, without
    // the public notice a self-joiner gets.
    h.say(11, 5, "hi all").await;
    assert!(h
        .gateway
        .deleted()
        .contains(&MessageHandle::in_group(GROUP, MessageId(5))));
    assert_eq!(h.gateway.live_prompts_for(UserId(11)).len(), 1);
    assert!(h
        .gateway
        .sent_to_group()
        .iter()
        .all(|m| !m.text.contains("you have not added enough members")));
}

#[tokio::test]
async fn restricted_self_joiner_gets_notice_and_single_prompt() {
    let h = Harness::new();
    h.self_join(10).await;
    h.say(10, 7, "let me in").await;
    h.say(10, 8, "please").await;

    let notices: Vec<_> = h
        .gateway
        .sent_to_group()
        .into_iter()
        .filter(|m| m.text.contains("you have not added enough members"))
        .collect();
    assert_eq!(notices.len(), 2);
    assert_eq!(h.gateway.live_prompts_for(UserId(10)).len(), 1);
    assert_eq!(h.gateway.deleted().len(), 2);
}

#[tokio::test]
async fn quota_boundary_unrestricts_at_exactly_required() {
    let h = Harness::new();
    h.set_quota(3).await;
    h.self_join(10).await;
    h.invite(10, 11).await;
    h.invite(10, 12).await;

    let membership = h.store.get_membership(UserId(10), GROUP).await.unwrap().unwrap();
    assert_eq!(membership.invited_count, 2);
    assert!(membership.is_restricted);
    assert!(h.gateway.sent_to_user(UserId(10)).is_empty());

    h.invite(10, 13).await;
    let membership = h.store.get_membership(UserId(10), GROUP).await.unwrap().unwrap();
    assert_eq!(membership.invited_count, 3);
    assert!(!membership.is_restricted);
    assert_eq!(
        h.gateway.permissions_for(UserId(10)).last(),
        Some(&MemberPermissions::unmuted())
    );
    let private = h.gateway.sent_to_user(UserId(10));
    assert_eq!(private.len(), 1);
    assert_eq!(private[0].text, messages::ACCESS_GRANTED);

    // Further invites still count but never re-notify.
    h.invite(10, 14).await;
    let membership = h.store.get_membership(UserId(10), GROUP).await.unwrap().unwrap();
    assert_eq!(membership.invited_count, 4);
    assert_eq!(h.gateway.sent_to_user(UserId(10)).len(), 1);
}

#[tokio::test]
async fn self_referral_is_treated_as_self_join() {
    let h = Harness::new();
    h.dispatch(InboundEvent::Membership(join_event(10, 10)))
        .await;

    let membership = h.store.get_membership(UserId(10), GROUP).await.unwrap().unwrap();
    assert_eq!(membership.inviter_id, None);
    assert_eq!(membership.invited_count, 0);
    assert_eq!(h.gateway.permissions_for(UserId(10)), vec![MemberPermissions::muted()]);
    assert_eq!(h.gateway.live_prompts_for(UserId(10)).len(), 1);
}

#[tokio::test]
async fn invite_from_unknown_inviter_is_dropped() {
    let h = Harness::new();
    h.invite(77, 11).await;

    assert!(h.store.get_membership(UserId(77), GROUP).await.unwrap().is_none());
    let invited = h.store.get_membership(UserId(11), GROUP).await.unwrap().unwrap();
    assert_eq!(invited.inviter_id, Some(UserId(77)));
}

#[tokio::test]
async fn leaving_keeps_state_and_rejoin_does_not_reprompt() {
    let h = Harness::new();
    h.self_join(10).await;
    let mut left = join_event(10, 10);
    left.old_status = invitegate_core::MemberStatus::Member;
    left.new_status = invitegate_core::MemberStatus::Left;
    h.dispatch(InboundEvent::Membership(left)).await;
    h.self_join(10).await;

    let membership = h.store.get_membership(UserId(10), GROUP).await.unwrap().unwrap();
    assert!(membership.is_restricted);
    assert_eq!(h.gateway.sent().len(), 1);
}

#[tokio::test]
async fn admins_and_bots_are_never_gated() {
    let h = Harness::new();
    h.say(ADMIN.0, 3, "hello").await;

    let mut bot = actor(500);
    bot.is_bot = true;
    h.dispatch(InboundEvent::Message(MessageEvent {
        scope: ChatScope::Group(GROUP),
        message_id: MessageId(4),
        sender: bot,
        text: Some("beep".into()),
    }))
    .await;

    assert!(h.gateway.calls().is_empty());
    assert!(h.provider.requests().is_empty());
    assert!(h.store.get_membership(ADMIN, GROUP).await.unwrap().is_none());
}

#[tokio::test]
async fn bot_authored_commands_are_ignored() {
    let h = Harness::new();
    let mut bot = actor(500);
    bot.is_bot = true;
    for (message_id, text) in [(5, "/set_required_users 3"), (6, "/help")] {
        let message = MessageEvent {
            scope: ChatScope::Group(GROUP),
            message_id: MessageId(message_id),
            sender: bot.clone(),
            text: Some(text.into()),
        };
        h.dispatch(InboundEvent::from_message(message, Some("gatebot")))
            .await;
    }

    assert!(h.gateway.calls().is_empty());
    assert!(h.store.get_settings(GROUP).await.unwrap().is_none());
}

#[tokio::test]
async fn help_in_group_needs_no_admin_rights() {
    let h = Harness::new();
    h.say(10, 7, "/help").await;

    let reply = h.gateway.sent_to_group().pop().unwrap();
    assert_eq!(reply.text, messages::HELP);
    assert_eq!(reply.reply_to, Some(MessageId(7)));
    assert!(h.store.get_membership(UserId(10), GROUP).await.unwrap().is_none());
}

#[tokio::test]
async fn unknown_sender_is_adopted_as_restricted() {
    let h = Harness::new();
    h.say(20, 9, "first words").await;

    let membership = h.store.get_membership(UserId(20), GROUP).await.unwrap().unwrap();
    assert!(membership.is_restricted);
    assert_eq!(h.gateway.permissions_for(UserId(20)), vec![MemberPermissions::muted()]);
    assert_eq!(h.gateway.live_prompts_for(UserId(20)).len(), 1);
    assert!(h
        .gateway
        .deleted()
        .contains(&MessageHandle::in_group(GROUP, MessageId(9))));
}

#[tokio::test]
async fn private_messages_get_help() {
    let h = Harness::new();
    h.dispatch(InboundEvent::Message(MessageEvent {
        scope: ChatScope::Private(UserId(10)),
        message_id: MessageId(1),
        sender: actor(10),
        text: Some("hello?".into()),
    }))
    .await;

    let sent = h.gateway.sent_to_user(UserId(10));
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].text, messages::HELP);
    assert!(h.provider.requests().is_empty());
}

#[tokio::test]
async fn set_required_users_validates_range() {
    let h = Harness::new();
    let mut message_id = 100;
    for argument in ["0", "21", "abc", ""] {
        message_id += 1;
        h.say(ADMIN.0, message_id, &format!("/set_required_users {argument}"))
            .await;
        let last = h.gateway.sent_to_group().pop().unwrap();
        assert_eq!(last.text, messages::invalid_range(1, 20), "argument {argument:?}");
        assert_eq!(last.reply_to, Some(MessageId(message_id)));
        assert!(h.store.get_settings(GROUP).await.unwrap().is_none());
    }

    h.say(ADMIN.0, 200, "/set_required_users 5").await;
    assert_eq!(
        h.gateway.sent_to_group().pop().unwrap().text,
        messages::required_updated(5)
    );
    assert_eq!(
        h.store.get_settings(GROUP).await.unwrap().unwrap().required_users,
        5
    );

    let audit = h
        .store
        .list_admin_commands(GROUP, QueryWindow::default())
        .await
        .unwrap();
    assert_eq!(audit.len(), 1);
    assert_eq!(audit[0].command, "set_required_users");
    assert_eq!(audit[0].parameters.as_deref(), Some("5"));
}

#[tokio::test]
async fn admin_commands_reject_non_admins() {
    let h = Harness::new();
    h.say(10, 30, "/set_required_users 3").await;
    h.say(10, 31, "/grandfather_existing").await;

    let replies = h.gateway.sent_to_group();
    assert_eq!(replies.len(), 2);
    assert!(replies.iter().all(|m| m.text == messages::ADMIN_ONLY));
    assert!(h.store.get_settings(GROUP).await.unwrap().is_none());
    // Commands are not gated messages: no membership is adopted.
    assert!(h.store.get_membership(UserId(10), GROUP).await.unwrap().is_none());
}

#[tokio::test]
async fn grandfather_skips_members_whose_unmute_fails() {
    let h = Harness::new();
    for user in 10..15 {
        h.self_join(user).await;
    }
    h.gateway.fail_unmute_for(UserId(12));

    h.say(ADMIN.0, 40, "/grandfather_existing").await;

    let reply = h.gateway.sent_to_group().pop().unwrap();
    assert_eq!(reply.text, messages::grandfathered(4));
    let still = h.store.list_restricted(GROUP).await.unwrap();
    assert_eq!(still.len(), 1);
    assert_eq!(still[0].user_id, UserId(12));

    // Released members lose their prompt; the skipped one keeps it.
    for user in [10, 11, 13, 14] {
        assert!(h.gateway.live_prompts_for(UserId(user)).is_empty());
    }
    assert_eq!(h.gateway.live_prompts_for(UserId(12)).len(), 1);

    let audit = h
        .store
        .list_admin_commands(GROUP, QueryWindow::default())
        .await
        .unwrap();
    assert_eq!(audit[0].parameters.as_deref(), Some("unrestricted_4_users"));
}

#[tokio::test]
async fn grandfather_with_nobody_restricted() {
    let h = Harness::new();
    h.say(ADMIN.0, 41, "/grandfather_existing").await;
    assert_eq!(
        h.gateway.sent_to_group().pop().unwrap().text,
        messages::GRANDFATHER_NONE
    );
}

#[tokio::test]
async fn status_reports_settings_and_restricted_count() {
    let h = Harness::new();
    h.say(ADMIN.0, 50, "/status").await;
    assert_eq!(
        h.gateway.sent_to_group().pop().unwrap().text,
        messages::STATUS_NOT_CONFIGURED
    );

    h.set_quota(4).await;
    h.self_join(10).await;
    h.self_join(11).await;
    h.say(ADMIN.0, 51, "/status").await;
    let text = h.gateway.sent_to_group().pop().unwrap().text;
    assert!(text.contains("Required members: 4"));
    assert!(text.contains("Restricted members: 2"));
}

#[tokio::test]
async fn control_press_by_someone_else_is_refused() {
    let h = Harness::new();
    h.self_join(10).await;
    h.press(11, &ControlPayload::new(UserId(10), GROUP).encode()).await;

    assert_eq!(
        h.gateway.answers(),
        vec![(Some(messages::NOT_FOR_YOU.to_string()), true)]
    );
    let membership = h.store.get_membership(UserId(10), GROUP).await.unwrap().unwrap();
    assert!(membership.is_restricted);
}

#[tokio::test]
async fn malformed_control_payloads_are_rejected() {
    let h = Harness::new();
    h.press(10, "check_invites:10").await;
    h.press(10, "something_else").await;
    // Well-formed, but no such membership.
    h.press(10, &ControlPayload::new(UserId(10), GROUP).encode()).await;

    let invalid = (Some(messages::INVALID_DATA.to_string()), true);
    assert_eq!(h.gateway.answers(), vec![invalid.clone(), invalid.clone(), invalid]);
}

#[tokio::test]
async fn control_press_below_quota_reports_remaining() {
    let h = Harness::new();
    h.self_join(10).await;
    h.invite(10, 11).await;
    h.press(10, &ControlPayload::new(UserId(10), GROUP).encode()).await;

    assert_eq!(
        h.gateway.answers(),
        vec![(Some(messages::still_not_enough(4)), true)]
    );
}

#[tokio::test]
async fn control_press_after_quota_lowered_grants_access() {
    let h = Harness::new();
    h.self_join(10).await;
    h.invite(10, 11).await;
    h.say(10, 60, "can I talk?").await;
    let prompt = h.gateway.live_prompts_for(UserId(10))[0];

    h.set_quota(1).await;
    h.press(10, &ControlPayload::new(UserId(10), GROUP).encode()).await;

    let membership = h.store.get_membership(UserId(10), GROUP).await.unwrap().unwrap();
    assert!(!membership.is_restricted);
    assert_eq!(membership.welcome_message_id, None);
    assert_eq!(
        h.gateway.edits(),
        vec![(prompt, messages::access_granted_prompt())]
    );
    assert_eq!(
        h.gateway.answers(),
        vec![(Some(messages::ACCESS_GRANTED.to_string()), false)]
    );
    assert!(h
        .gateway
        .sent_to_group()
        .iter()
        .any(|m| m.text == messages::group_success("@user10")));

    // A stale button pressed again is edited and acknowledged.
    let stale = MessageHandle::in_group(GROUP, MessageId(4242));
    h.dispatch(InboundEvent::Control(invitegate_core::ControlEvent {
        control_id: "cb-again".into(),
        presser: actor(10),
        payload: ControlPayload::new(UserId(10), GROUP).encode(),
        origin: Some(stale),
    }))
    .await;
    assert_eq!(h.gateway.edits().last().map(|(handle, _)| *handle), Some(stale));
    assert_eq!(
        h.gateway.answers().last(),
        Some(&(Some(messages::ACCESS_GRANTED.to_string()), false))
    );
}

#[tokio::test]
async fn rejected_prompt_delete_still_clears_recorded_prompt() {
    let h = Harness::new();
    h.self_join(10).await;
    h.gateway.reject_next_deletes(1);
    h.invite(10, 11).await;

    let membership = h.store.get_membership(UserId(10), GROUP).await.unwrap().unwrap();
    assert_eq!(membership.welcome_message_id, None);

    // With the id cleared the next message may prompt again.
    h.say(10, 70, "hello").await;
    let membership = h.store.get_membership(UserId(10), GROUP).await.unwrap().unwrap();
    assert!(membership.welcome_message_id.is_some());
}

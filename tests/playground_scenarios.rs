//! DOM interaction scenarios against the playground page: clicking,
//! typing, checkboxes, radios, selects, uploads, ranges, and form submit.

mod support;

use browser_harness::{
    Command, CommandQueue, Predicate, Result, SelectChoice, Target, UploadMode,
};
use support::session_with_page;

#[test]
fn heading_is_visible_on_load() -> Result<()> {
    let mut session = session_with_page()?;
    session.expect(
        &Target::containing("h1", "Interaction Playground"),
        &Predicate::Visible,
    )
}

#[test]
fn subscribe_button_reveals_confirmation() -> Result<()> {
    let mut session = session_with_page()?;
    session.expect(&Target::new("#subscribe-message"), &Predicate::NotVisible)?;
    session.perform(Command::Click(Target::new("#subscribe-button")))?;
    session.expect(
        &Target::new("#subscribe-message"),
        &Predicate::TextEquals("You have been successfully subscribed!".into()),
    )?;
    session.expect(&Target::new("#subscribe-message"), &Predicate::Visible)
}

#[test]
fn typing_updates_the_signature_preview() -> Result<()> {
    let mut session = session_with_page()?;
    session.perform(Command::TypeText {
        target: Target::new("#signature-input"),
        text: "Felipe Barra".into(),
        masked: false,
    })?;
    session.expect(
        &Target::new("#signature-preview"),
        &Predicate::TextEquals("Felipe Barra".into()),
    )?;
    session.expect(
        &Target::new("#signature-input"),
        &Predicate::ValueEquals("Felipe Barra".into()),
    )
}

#[test]
fn signature_checkbox_toggles_preview_visibility() -> Result<()> {
    let mut session = session_with_page()?;
    session.perform(Command::Check(Target::new("#signature-check")))?;
    session.expect(&Target::new("#signature-check"), &Predicate::Checked)?;
    session.expect(&Target::new("#signature-preview"), &Predicate::Visible)?;

    session.perform(Command::Uncheck(Target::new("#signature-check")))?;
    session.expect(&Target::new("#signature-check"), &Predicate::NotChecked)?;
    session.expect(&Target::new("#signature-preview"), &Predicate::NotVisible)
}

#[test]
fn checking_a_checked_box_fires_no_extra_change() -> Result<()> {
    let mut session = session_with_page()?;
    session.perform(Command::Check(Target::new("#signature-check")))?;
    // A redundant check is a no-op, so the preview stays visible.
    session.perform(Command::Check(Target::new("#signature-check")))?;
    session.expect(&Target::new("#signature-check"), &Predicate::Checked)?;
    session.expect(&Target::new("#signature-preview"), &Predicate::Visible)
}

#[test]
fn radio_group_is_exclusive_and_bubbles_to_section() -> Result<()> {
    let mut session = session_with_page()?;
    session.perform(Command::Check(Target::new("#answer-yes")))?;
    session.expect(
        &Target::new("#answer-display"),
        &Predicate::TextEquals("You picked: yes".into()),
    )?;

    session.perform(Command::Check(Target::new("#answer-no")))?;
    session.expect(&Target::new("#answer-no"), &Predicate::Checked)?;
    session.expect(&Target::new("#answer-yes"), &Predicate::NotChecked)?;
    session.expect(
        &Target::new("#answer-display"),
        &Predicate::TextEquals("You picked: no".into()),
    )
}

#[test]
fn select_by_one_based_index_skips_disabled_placeholder() -> Result<()> {
    let mut session = session_with_page()?;
    session.perform(Command::SelectOption {
        target: Target::new("#tier-select"),
        choice: SelectChoice::Index(3),
    })?;
    session.expect(
        &Target::new("#tier-select"),
        &Predicate::ValueEquals("vip".into()),
    )?;
    session.expect(
        &Target::new("#tier-display"),
        &Predicate::TextEquals("You've selected: VIP".into()),
    )
}

#[test]
fn select_by_text_and_value_pick_the_same_option() -> Result<()> {
    let mut session = session_with_page()?;
    session.perform(Command::SelectOption {
        target: Target::new("#tier-select"),
        choice: SelectChoice::Text("Standard".into()),
    })?;
    session.expect(
        &Target::new("#tier-select"),
        &Predicate::ValueEquals("standard".into()),
    )?;

    session.perform(Command::SelectOption {
        target: Target::new("#tier-select"),
        choice: SelectChoice::Value("basic".into()),
    })?;
    session.expect(
        &Target::new("#tier-select"),
        &Predicate::ValueEquals("basic".into()),
    )
}

#[test]
fn multi_select_reports_every_picked_fruit() -> Result<()> {
    let mut session = session_with_page()?;
    session.perform(Command::SelectMany {
        target: Target::new("#fruit-select"),
        values: vec!["apple".into(), "cherry".into()],
    })?;
    session.expect(
        &Target::new("#fruit-display"),
        &Predicate::TextEquals("Fruits: apple, cherry".into()),
    )?;
    assert_eq!(
        session.selected_values_of("#fruit-select")?,
        vec!["apple".to_string(), "cherry".to_string()]
    );
    Ok(())
}

#[test]
fn upload_by_selection_and_drag_drop_show_the_file_name() -> Result<()> {
    let mut session = session_with_page()?;
    session.perform(Command::Upload {
        target: Target::new("#file-input"),
        file_name: "example.json".into(),
        mode: UploadMode::Select,
    })?;
    session.expect(
        &Target::new("#file-display"),
        &Predicate::TextContains("example.json".into()),
    )?;

    session.perform(Command::Upload {
        target: Target::new("#file-input"),
        file_name: "dropped.txt".into(),
        mode: UploadMode::DragDrop,
    })?;
    session.expect(
        &Target::new("#file-display"),
        &Predicate::TextContains("dropped.txt".into()),
    )
}

#[test]
fn range_input_drives_the_level_display() -> Result<()> {
    let mut session = session_with_page()?;
    session.perform(Command::SetRange {
        target: Target::new("#level-range"),
        value: 7,
    })?;
    session.expect(
        &Target::new("#level-display"),
        &Predicate::TextEquals("Level: 7".into()),
    )
}

#[test]
fn date_input_is_echoed_back() -> Result<()> {
    let mut session = session_with_page()?;
    session.perform(Command::TypeText {
        target: Target::new("#date-input"),
        text: "2019-11-09".into(),
        masked: false,
    })?;
    session.expect(
        &Target::new("#date-echo"),
        &Predicate::TextEquals("You selected: 2019-11-09".into()),
    )
}

#[test]
fn password_visibility_toggle_flips_the_input_type() -> Result<()> {
    let mut session = session_with_page()?;
    session.expect(
        &Target::new("#password-input"),
        &Predicate::AttrEquals("type".into(), "password".into()),
    )?;

    session.perform(Command::Click(Target::new("#toggle-password")))?;
    session.expect(
        &Target::new("#password-input"),
        &Predicate::AttrEquals("type".into(), "text".into()),
    )?;

    session.perform(Command::Click(Target::new("#toggle-password")))?;
    session.expect(
        &Target::new("#password-input"),
        &Predicate::NotAttrEquals("type".into(), "text".into()),
    )
}

#[test]
fn animals_list_counts_five_items() -> Result<()> {
    let mut session = session_with_page()?;
    session.expect(&Target::new("ul#animals li"), &Predicate::CountEquals(5))?;
    session.expect(
        &Target::containing("ul#animals li", "frog"),
        &Predicate::Exist,
    )
}

#[test]
fn form_submit_is_intercepted_by_the_page() -> Result<()> {
    let mut session = session_with_page()?;
    let password = support::account_password();
    let mut queue = CommandQueue::new();
    queue
        .enqueue(Command::TypeText {
            target: Target::new("#email-input"),
            text: "user@example.com".into(),
            masked: false,
        })
        .enqueue(Command::TypeText {
            target: Target::new("#password-input"),
            text: password.clone(),
            masked: true,
        })
        .enqueue(Command::Click(Target::containing("button", "Sign up")));
    queue.run(&mut session)?;
    session.expect(
        &Target::new("#form-message"),
        &Predicate::TextEquals("Thanks for signing up!".into()),
    )?;
    // The value reached the control even though the step stays masked.
    session.expect(
        &Target::new("#password-input"),
        &Predicate::ValueEquals(password),
    )
}

#[test]
fn masked_typing_never_exposes_the_injected_secret() {
    let password = support::account_password();
    let command = Command::TypeText {
        target: Target::new("#password-input"),
        text: password.clone(),
        masked: true,
    };
    let described = command.describe();
    assert!(!described.contains(&password), "{described}");
    assert!(described.contains("<masked>"), "{described}");
}

#[test]
fn queue_stops_at_the_first_failing_step() -> Result<()> {
    let mut session = session_with_page()?;
    session.set_poll_options(browser_harness::PollOptions::new(100, 50));
    let mut queue = CommandQueue::new();
    queue
        .enqueue(Command::Click(Target::new("#no-such-button")))
        .enqueue(Command::Click(Target::new("#subscribe-button")));
    let err = queue.run(&mut session).expect_err("first step must fail");
    assert!(err.to_string().contains("#no-such-button"), "{err}");
    assert!(queue.is_empty());
    // The queued click after the failure never ran.
    session.expect(&Target::new("#subscribe-message"), &Predicate::NotVisible)
}

#[test]
fn disabled_control_ignores_clicks() -> Result<()> {
    let mut session = session_with_page()?;
    session.set_attr("#subscribe-button", "disabled", "true")?;
    session.perform(Command::Click(Target::new("#subscribe-button")))?;
    session.expect(&Target::new("#subscribe-message"), &Predicate::NotVisible)
}

#[test]
fn stale_targets_are_requeried_after_dom_mutation() -> Result<()> {
    let mut session = session_with_page()?;
    // Replace the button with a fresh node carrying the same id; the next
    // step must resolve against the live document, not a cached handle.
    session.remove("#subscribe-button")?;
    session.append_html(
        "#subscription",
        r#"<button id="subscribe-button" type="button">Subscribe</button>"#,
    )?;
    session.on("#subscribe-button", "click", |session, _event| {
        session.set_text("#subscribe-message", "You have been successfully subscribed!")?;
        session.show("#subscribe-message")
    })?;
    session.perform(Command::Click(Target::new("#subscribe-button")))?;
    session.expect(&Target::new("#subscribe-message"), &Predicate::Visible)
}

#[test]
fn count_predicate_observes_appended_rows() -> Result<()> {
    let mut session = session_with_page()?;
    session.append_html("#picker", r#"<ul id="rows"><li>one</li></ul>"#)?;
    session.expect(
        &Target::new("#rows li"),
        &Predicate::CountEquals(1),
    )?;
    session.append_html("#rows", "<li>two</li><li>three</li>")?;
    session.expect(&Target::new("#rows li"), &Predicate::CountEquals(3))
}

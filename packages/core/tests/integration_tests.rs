//! End-to-end tests driving the whole engine through the public API: the
//! update/flush cycle, serialization round trips, selection laws across
//! structural edits, and reconciler DOM reuse against `vellum-dom`.

use std::borrow::Cow;
use std::cell::RefCell;
use std::rc::Rc;

use vellum_core::{
    create_editor, Editor, EditorError, EditorState, InvariantViolation, Node, NodeFlags,
    NodeKey, NodeStore, Point, Selection, TextFormat, Theme,
};
use vellum_dom::{DomId, DomTree};

fn attached_editor() -> Editor {
    let mut editor = create_editor(
        Theme::new()
            .with_tag_class("paragraph", "v-paragraph")
            .with_format_class(TextFormat::BOLD, "v-bold"),
    );
    editor.set_root_element(Some(DomTree::new("div"))).unwrap();
    editor
}

fn first_block(editor: &Editor) -> NodeKey {
    editor
        .get_editor_state()
        .children_of(&NodeKey::root())
        .first()
        .cloned()
        .unwrap()
}

/// Root > paragraph > [text "01234", bold text "56789"], committed.
fn two_text_editor() -> (Editor, NodeKey, NodeKey, NodeKey) {
    let mut editor = attached_editor();
    let p = first_block(&editor);
    let keys = Rc::new(RefCell::new(Vec::new()));
    let out = Rc::clone(&keys);
    editor
        .update(move |tx| {
            let a = tx.create_text("01234")?;
            let b = tx.create_text_with("56789", TextFormat::BOLD, NodeFlags::default())?;
            tx.append(&p, &a)?;
            tx.append(&p, &b)?;
            out.borrow_mut().extend([a, b]);
            Ok(())
        })
        .unwrap();
    editor.flush().unwrap();
    let (a, b) = {
        let keys = keys.borrow();
        (keys[0].clone(), keys[1].clone())
    };
    let p = first_block(&editor);
    (editor, p, a, b)
}

// -- selection slicing and normalization -------------------------------------

#[test]
fn test_full_coverage_slice_borrows_both_nodes() {
    let (editor, _, a, b) = two_text_editor();
    let state = editor.get_editor_state();
    let selection = Selection::new(Point::text(a.clone(), 0), Point::text(b.clone(), 5));
    for key in [&a, &b] {
        let node = state.node(key).unwrap();
        assert!(matches!(
            selection.slice_selected_text_content(state, node),
            Cow::Borrowed(_)
        ));
    }
}

#[test]
fn test_partial_coverage_slice_clones_only_the_cut_node() {
    let (editor, _, a, b) = two_text_editor();
    let state = editor.get_editor_state();
    // 0..8: the last character of the second node is outside the range.
    let selection = Selection::new(Point::text(a.clone(), 0), Point::text(b.clone(), 4));
    assert!(matches!(
        selection.slice_selected_text_content(state, state.node(&a).unwrap()),
        Cow::Borrowed(_)
    ));
    let sliced = selection.slice_selected_text_content(state, state.node(&b).unwrap());
    assert!(matches!(sliced, Cow::Owned(_)));
    assert_eq!(sliced.as_text().unwrap().text, "5678");
}

#[test]
fn test_insert_text_into_unmergeable_run() {
    let mut editor = attached_editor();
    let p = first_block(&editor);
    let first = Rc::new(RefCell::new(None));
    let out = Rc::clone(&first);
    editor
        .update(move |tx| {
            for label in ["a", "b", "c"] {
                let key =
                    tx.create_text_with(label, TextFormat::default(), NodeFlags::UNMERGEABLE)?;
                tx.append(&p, &key)?;
                if label == "a" {
                    *out.borrow_mut() = Some(key);
                }
            }
            Ok(())
        })
        .unwrap();
    editor.flush().unwrap();
    let a = first.borrow().clone().unwrap();

    editor
        .update(|tx| {
            tx.set_selection(Some(Selection::collapsed(Point::text(a.clone(), 0))));
            tx.insert_text("Test")
        })
        .unwrap();
    editor.flush().unwrap();

    let state = editor.get_editor_state();
    let a = first.borrow().clone().unwrap();
    assert_eq!(state.node(&a).unwrap().as_text().unwrap().text, "Testa");
    let selection = state.selection().unwrap();
    assert_eq!(selection.anchor, Point::text(a.clone(), 4));
    assert_eq!(selection.focus, Point::text(a, 4));
    assert_eq!(state.text_content(), "Testabc");
}

#[test]
fn test_normalization_merges_runs_under_selection() {
    // Mergeable runs "a", "", "b", "c" with a range selection across them:
    // committing merges everything into the first node and folds the
    // selection into it.
    let mut editor = attached_editor();
    let p = first_block(&editor);
    let keys = Rc::new(RefCell::new(Vec::new()));
    let out = Rc::clone(&keys);
    editor
        .update(move |tx| {
            for label in ["a", "", "b", "c"] {
                let key = tx.create_text(label)?;
                tx.append(&p, &key)?;
                out.borrow_mut().push(key);
            }
            let keys = out.borrow();
            tx.set_selection(Some(Selection::new(
                Point::text(keys[0].clone(), 0),
                Point::text(keys[3].clone(), 1),
            )));
            Ok(())
        })
        .unwrap();
    editor.flush().unwrap();

    let state = editor.get_editor_state();
    let p = first_block(&editor);
    let survivor = keys.borrow()[0].clone();
    assert_eq!(state.children_of(&p), &[survivor.clone()]);
    assert_eq!(
        state.node(&survivor).unwrap().as_text().unwrap().text,
        "abc"
    );
    let selection = state.selection().unwrap();
    assert_eq!(selection.anchor, Point::text(survivor.clone(), 0));
    assert_eq!(selection.focus, Point::text(survivor, 3));
}

#[test]
fn test_ambiguous_insert_list_leaves_dom_untouched() {
    let (mut editor, p, a, _) = two_text_editor();
    let dom_before: Vec<DomId> = {
        let dom = editor.dom().unwrap();
        dom.children(dom.root()).to_vec()
    };
    let paragraph_dom = editor.get_element_by_key(&p).unwrap();

    let err = editor
        .update(|tx| {
            tx.set_selection(Some(Selection::collapsed(Point::text(a.clone(), 0))));
            let heading = tx.create_element("heading")?;
            let title = tx.create_text("title")?;
            tx.append(&heading, &title)?;
            let stray = tx.create_text("stray")?;
            tx.insert_nodes(&[heading, stray])
        })
        .unwrap_err();
    assert!(matches!(
        err,
        EditorError::Invariant(InvariantViolation::AmbiguousInsertTarget)
    ));

    // The draft was discarded; neither the model nor the DOM changed.
    assert_eq!(editor.get_editor_state().text_content(), "0123456789");
    let dom = editor.dom().unwrap();
    assert_eq!(dom.children(dom.root()), dom_before.as_slice());
    assert_eq!(editor.get_element_by_key(&p), Some(paragraph_dom));
}

// -- properties --------------------------------------------------------------

#[test]
fn test_key_stability_across_versions() {
    let (mut editor, p, a, b) = two_text_editor();
    editor
        .update(|tx| {
            let writable = tx.writable(&b)?;
            if let Some(text) = writable.as_text_mut() {
                text.text.push('!');
            }
            Ok(())
        })
        .unwrap();
    editor.flush().unwrap();

    let state = editor.get_editor_state();
    // Untouched nodes keep their keys and their attachment.
    assert_eq!(state.node(&a).unwrap().key, a);
    assert_eq!(state.node(&a).unwrap().parent, Some(p.clone()));
    assert!(state.is_attached(&a));
    assert!(state.is_attached(&b));
    assert_eq!(state.node(&b).unwrap().as_text().unwrap().text, "56789!");
}

#[test]
fn test_copy_on_write_isolation() {
    let (mut editor, _, a, _) = two_text_editor();
    let before: EditorState = editor.get_editor_state().clone();
    editor
        .update(|tx| {
            let writable = tx.writable(&a)?;
            if let Some(text) = writable.as_text_mut() {
                text.text = "mutated".to_string();
            }
            Ok(())
        })
        .unwrap();
    editor.flush().unwrap();

    // The snapshot taken before the update is untouched.
    assert_eq!(before.node(&a).unwrap().as_text().unwrap().text, "01234");
    assert_eq!(
        editor
            .get_editor_state()
            .node(&a)
            .unwrap()
            .as_text()
            .unwrap()
            .text,
        "mutated"
    );
    assert!(!before.equals(editor.get_editor_state()));
}

#[test]
fn test_round_trip_serialization() -> anyhow::Result<()> {
    let (mut editor, _, a, _) = two_text_editor();
    editor.update(|tx| {
        tx.set_selection(Some(Selection::collapsed(Point::text(a.clone(), 3))));
        Ok(())
    })?;
    editor.flush()?;

    let json = editor.get_editor_state().stringify()?;
    let parsed = editor.parse_state(&json)?;
    assert!(parsed.is(editor.get_editor_state()));
    Ok(())
}

#[test]
fn test_selection_offsets_survive_sibling_removal() -> anyhow::Result<()> {
    let (mut editor, _, a, b) = two_text_editor();
    editor.update(|tx| {
        tx.set_selection(Some(Selection::collapsed(Point::text(b.clone(), 2))));
        tx.remove(&a)
    })?;
    editor.flush()?;

    // Removing a sibling before the selected node never shifts the
    // selected node's own internal offset.
    let state = editor.get_editor_state();
    let selection = state.selection().unwrap();
    assert_eq!(selection.anchor, Point::text(b.clone(), 2));
    assert!(state.node(&selection.anchor.key).is_some());
    assert_eq!(state.node(&b).unwrap().as_text().unwrap().text, "56789");
    Ok(())
}

#[test]
fn test_writable_is_idempotent_within_one_update() {
    let (mut editor, _, a, _) = two_text_editor();
    let pointers = Rc::new(RefCell::new((0usize, 0usize)));
    let out = Rc::clone(&pointers);
    editor
        .update(move |tx| {
            out.borrow_mut().0 = tx.writable(&a)? as *const Node as usize;
            out.borrow_mut().1 = tx.writable(&a)? as *const Node as usize;
            Ok(())
        })
        .unwrap();
    let (one, two) = *pointers.borrow();
    assert_eq!(one, two);
}

#[test]
fn test_reconciler_reuses_untouched_dom() {
    let (mut editor, p, a, b) = two_text_editor();
    let root_dom = editor.dom().unwrap().root();
    let p_dom = editor.get_element_by_key(&p).unwrap();
    let a_dom = editor.get_element_by_key(&a).unwrap();
    let b_dom = editor.get_element_by_key(&b).unwrap();

    editor
        .update(|tx| {
            let writable = tx.writable(&b)?;
            if let Some(text) = writable.as_text_mut() {
                text.text = "changed".to_string();
            }
            Ok(())
        })
        .unwrap();
    editor.flush().unwrap();

    // Every sibling and ancestor keeps its DOM node; only the touched text
    // node's content changed, in place.
    assert_eq!(editor.dom().unwrap().root(), root_dom);
    assert_eq!(editor.get_element_by_key(&p), Some(p_dom));
    assert_eq!(editor.get_element_by_key(&a), Some(a_dom));
    assert_eq!(editor.get_element_by_key(&b), Some(b_dom));
    let dom = editor.dom().unwrap();
    assert_eq!(dom.text_content(b_dom), "changed");
    assert_eq!(dom.text_content(root_dom), "01234changed");
}

#[test]
fn test_theme_classes_appear_in_dom() {
    let (editor, p, _, b) = two_text_editor();
    let dom = editor.dom().unwrap();
    let p_dom = editor.get_element_by_key(&p).unwrap();
    assert_eq!(dom.class_name(p_dom), Some("v-paragraph"));
    let b_dom = editor.get_element_by_key(&b).unwrap();
    assert_eq!(dom.class_name(b_dom), Some("v-bold"));
}

#[test]
fn test_trailing_break_follows_line_break_edits() {
    let mut editor = attached_editor();
    let p = first_block(&editor);
    let text_key = Rc::new(RefCell::new(None));
    let out = Rc::clone(&text_key);
    editor
        .update(move |tx| {
            let t = tx.create_text("line")?;
            tx.append(&p, &t)?;
            tx.set_selection(Some(Selection::collapsed(Point::text(t.clone(), 4))));
            *out.borrow_mut() = Some(t);
            tx.insert_line_break()
        })
        .unwrap();
    editor.flush().unwrap();

    // Paragraph ends in a line break, so the DOM carries the model <br>
    // plus one synthetic trailing <br> for caret visibility.
    let p = first_block(&editor);
    let dom = editor.dom().unwrap();
    let p_dom = editor.get_element_by_key(&p).unwrap();
    let brs = dom
        .children(p_dom)
        .iter()
        .filter(|id| dom.tag(**id) == Some("br"))
        .count();
    assert_eq!(brs, 2);

    // Typing after the break removes the synthetic one.
    editor.update(|tx| tx.insert_text("two")).unwrap();
    editor.flush().unwrap();
    let dom = editor.dom().unwrap();
    let brs = dom
        .children(p_dom)
        .iter()
        .filter(|id| dom.tag(**id) == Some("br"))
        .count();
    assert_eq!(brs, 1);
    assert_eq!(editor.get_editor_state().text_content(), "line\ntwo");
}

#[test]
fn test_format_text_end_to_end() {
    let mut editor = attached_editor();
    let p = first_block(&editor);
    let key = Rc::new(RefCell::new(None));
    let out = Rc::clone(&key);
    editor
        .update(move |tx| {
            let t = tx.create_text("make this bold")?;
            tx.append(&p, &t)?;
            tx.set_selection(Some(Selection::new(
                Point::text(t.clone(), 5),
                Point::text(t.clone(), 9),
            )));
            *out.borrow_mut() = Some(t);
            tx.format_text(TextFormat::BOLD)
        })
        .unwrap();
    editor.flush().unwrap();

    let state = editor.get_editor_state();
    let p = first_block(&editor);
    let children = state.children_of(&p).to_vec();
    assert_eq!(children.len(), 3);
    let mid = state.node(&children[1]).unwrap().as_text().unwrap();
    assert_eq!(mid.text, "this");
    assert!(mid.format.contains(TextFormat::BOLD));
    assert_eq!(state.text_content(), "make this bold");

    // The formatted run gets its own styled span in the DOM.
    let dom = editor.dom().unwrap();
    let mid_dom = editor.get_element_by_key(&children[1]).unwrap();
    assert_eq!(dom.class_name(mid_dom), Some("v-bold"));
}

#[test]
fn test_insert_paragraph_end_to_end() {
    let mut editor = attached_editor();
    let p = first_block(&editor);
    editor
        .update(move |tx| {
            let t = tx.create_text("first second")?;
            tx.append(&p, &t)?;
            tx.set_selection(Some(Selection::collapsed(Point::text(t, 5))));
            tx.insert_paragraph()
        })
        .unwrap();
    editor.flush().unwrap();

    let state = editor.get_editor_state();
    let blocks = state.children_of(&NodeKey::root()).to_vec();
    assert_eq!(blocks.len(), 2);
    assert_eq!(state.text_content_of(&blocks[0]), "first");
    assert_eq!(state.text_content_of(&blocks[1]), " second");
    // Both blocks render with their own DOM element.
    let dom = editor.dom().unwrap();
    assert_eq!(dom.children(dom.root()).len(), 2);
    assert_eq!(state.text_content(), "first second");
}

#[test]
fn test_delete_selection_across_blocks_end_to_end() {
    let mut editor = attached_editor();
    let p = first_block(&editor);
    let keys = Rc::new(RefCell::new(Vec::new()));
    let out = Rc::clone(&keys);
    editor
        .update(move |tx| {
            let a = tx.create_text("hello")?;
            tx.append(&p, &a)?;
            let q = tx.create_paragraph()?;
            tx.append(&NodeKey::root(), &q)?;
            let b = tx.create_text("world")?;
            tx.append(&q, &b)?;
            out.borrow_mut().extend([a, b]);
            Ok(())
        })
        .unwrap();
    editor.flush().unwrap();

    let (a, b) = {
        let keys = keys.borrow();
        (keys[0].clone(), keys[1].clone())
    };
    editor
        .update(|tx| {
            tx.set_selection(Some(Selection::new(
                Point::text(a.clone(), 3),
                Point::text(b.clone(), 2),
            )));
            tx.delete_selection()
        })
        .unwrap();
    editor.flush().unwrap();

    let state = editor.get_editor_state();
    assert_eq!(state.text_content(), "helrld");
    // One block remains; the tail block's DOM was destroyed.
    assert_eq!(state.children_of(&NodeKey::root()).len(), 1);
    let dom = editor.dom().unwrap();
    assert_eq!(dom.children(dom.root()).len(), 1);
    assert_eq!(dom.text_content(dom.root()), "helrld");
}

#[test]
fn test_decorator_listener_fires_for_dirty_decorators() {
    let mut editor = attached_editor();
    let p = first_block(&editor);
    let seen = Rc::new(RefCell::new(Vec::new()));
    let out = Rc::clone(&seen);
    editor.add_decorator_listener(move |keys| {
        out.borrow_mut().extend(keys.iter().cloned());
    });
    editor
        .update(move |tx| {
            let image = tx.create_decorator("image")?;
            tx.append(&p, &image)?;
            Ok(())
        })
        .unwrap();
    editor.flush().unwrap();
    assert_eq!(seen.borrow().len(), 1);
    let state = editor.get_editor_state();
    assert!(state.node(&seen.borrow()[0]).unwrap().is_decorator());
}

#[test]
fn test_update_listener_payload_tracks_versions() {
    let (mut editor, _, a, _) = two_text_editor();
    let observed = Rc::new(RefCell::new(None));
    let out = Rc::clone(&observed);
    editor.add_update_listener(move |payload| {
        *out.borrow_mut() = Some((
            payload.prev_state.text_content(),
            payload.next_state.text_content(),
            payload.dirty_nodes.len(),
        ));
    });
    editor
        .update(|tx| {
            let writable = tx.writable(&a)?;
            if let Some(text) = writable.as_text_mut() {
                text.text = "x".to_string();
            }
            Ok(())
        })
        .unwrap();
    editor.flush().unwrap();

    let observed = observed.borrow().clone().unwrap();
    assert_eq!(observed.0, "0123456789");
    assert_eq!(observed.1, "x56789");
    assert!(observed.2 >= 1);
}

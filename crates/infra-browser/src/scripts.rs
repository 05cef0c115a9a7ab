// Page-side JavaScript for the PageDriver operations
//
// Every argument is embedded as a JSON string literal, so selectors and
// query text never need manual escaping.

use citewatch_core::port::InputKind;
use serde_json::Value;

fn lit(s: &str) -> String {
    Value::String(s.to_string()).to_string()
}

pub(crate) fn exists(selector: &str) -> String {
    format!("document.querySelector({}) !== null", lit(selector))
}

pub(crate) fn is_enabled(selector: &str) -> String {
    format!(
        "(() => {{ const el = document.querySelector({}); \
         return !!el && !el.disabled && el.getAttribute('aria-disabled') !== 'true'; }})()",
        lit(selector)
    )
}

pub(crate) fn text_of_last(selector: &str) -> String {
    format!(
        "(() => {{ const els = document.querySelectorAll({}); \
         if (els.length === 0) return null; \
         const el = els[els.length - 1]; \
         return el.innerText ?? el.textContent ?? ''; }})()",
        lit(selector)
    )
}

/// Body innerText with the rendered text of every `exclude` match cut out
pub(crate) fn visible_text(exclude: &[&str]) -> String {
    let excluded = Value::from(exclude.iter().map(|s| s.to_string()).collect::<Vec<_>>());
    format!(
        "(() => {{ if (!document.body) return ''; \
         let text = document.body.innerText; \
         for (const sel of {}) {{ \
           let els = []; \
           try {{ els = document.querySelectorAll(sel); }} catch (_) {{ continue; }} \
           for (const el of els) {{ const t = el.innerText; if (t) text = text.split(t).join('\\n'); }} \
         }} \
         return text; }})()",
        excluded
    )
}

pub(crate) const CURRENT_URL: &str = "location.href";

pub(crate) const READY_STATE: &str = "document.readyState";

pub(crate) fn links_within(scope: &str) -> String {
    format!(
        "(() => {{ const scopes = document.querySelectorAll({}); \
         if (scopes.length === 0) return []; \
         const root = scopes[scopes.length - 1]; \
         return Array.from(root.querySelectorAll('a[href]')).map(a => ({{ \
           href: a.href, text: (a.innerText || a.textContent || '').trim(), \
           title: a.getAttribute('title') }})); }})()",
        lit(scope)
    )
}

pub(crate) const IFRAME_SOURCES: &str =
    "Array.from(document.querySelectorAll('iframe')).map(f => f.src || '')";

pub(crate) fn set_input(selector: &str, text: &str, kind: InputKind) -> String {
    let write = match kind {
        // React tracks the value through the prototype setter
        InputKind::Plain => {
            "const proto = el instanceof HTMLTextAreaElement \
               ? HTMLTextAreaElement.prototype : HTMLInputElement.prototype; \
             const setter = Object.getOwnPropertyDescriptor(proto, 'value'); \
             if (setter && setter.set) { setter.set.call(el, text); } else { el.value = text; } \
             el.dispatchEvent(new InputEvent('beforeinput', { bubbles: true, data: text, inputType: 'insertText' })); \
             el.dispatchEvent(new Event('input', { bubbles: true })); \
             el.dispatchEvent(new Event('change', { bubbles: true }));"
        }
        InputKind::Rich => {
            "const sel = window.getSelection(); \
             const range = document.createRange(); \
             range.selectNodeContents(el); \
             sel.removeAllRanges(); sel.addRange(range); \
             el.dispatchEvent(new InputEvent('beforeinput', { bubbles: true, data: text, inputType: 'insertText' })); \
             if (!document.execCommand('insertText', false, text)) { el.textContent = text; } \
             el.dispatchEvent(new Event('input', { bubbles: true })); \
             el.dispatchEvent(new Event('change', { bubbles: true }));"
        }
    };
    format!(
        "(() => {{ const el = document.querySelector({}); \
         if (!el) return false; \
         const text = {}; \
         el.focus(); el.dispatchEvent(new FocusEvent('focus')); \
         {} \
         return true; }})()",
        lit(selector),
        lit(text),
        write
    )
}

pub(crate) fn click(selector: &str) -> String {
    format!(
        "(() => {{ const el = document.querySelector({}); \
         if (!el) return false; el.click(); return true; }})()",
        lit(selector)
    )
}

pub(crate) fn focus(selector: &str) -> String {
    format!(
        "(() => {{ const el = document.querySelector({}); \
         if (!el) return false; el.focus(); return true; }})()",
        lit(selector)
    )
}

use ammonia;

/// Clean question markup using the ammonia library.
///
/// Question text arrives from the content store as HTML fragments (sub/sup
/// for chemistry formulae, <b>/<i> emphasis). Whitelist-based sanitization
/// keeps those while stripping <script>, <iframe> and event-handler
/// attributes, so a poisoned question upload cannot run code inside a
/// candidate's exam screen.
pub fn clean_markup(input: &str) -> String {
    ammonia::clean(input)
}

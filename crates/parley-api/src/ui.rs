//! Self-contained browser chat page served at `/ui`.
//!
//! Keeps a session id in localStorage, posts messages to `/chat`, reloads
//! history from `/sessions/{id}/history`, and clears it with `DELETE`.

pub const CHAT_HTML: &str = r##"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="utf-8">
<meta name="viewport" content="width=device-width, initial-scale=1">
<title>Parley ShopBot</title>
<style>
  :root { --bg: #f6f7f9; --panel: #fff; --ink: #1d2433; --muted: #6b7385; --accent: #2f6fec; }
  * { box-sizing: border-box; }
  body { margin: 0; font: 15px/1.45 system-ui, sans-serif; background: var(--bg); color: var(--ink); }
  header { display: flex; gap: 12px; align-items: center; padding: 12px 20px; background: var(--panel); border-bottom: 1px solid #e3e6eb; }
  header h1 { font-size: 17px; margin: 0 auto 0 0; }
  header input { width: 160px; padding: 6px 8px; border: 1px solid #cfd4dc; border-radius: 6px; }
  button { padding: 7px 14px; border: 0; border-radius: 6px; background: var(--accent); color: #fff; cursor: pointer; }
  button.secondary { background: #e7eaf0; color: var(--ink); }
  main { max-width: 760px; margin: 0 auto; padding: 16px 20px 110px; }
  .turn { margin: 10px 0; padding: 10px 14px; border-radius: 10px; max-width: 85%; white-space: pre-wrap; }
  .user { background: var(--accent); color: #fff; margin-left: auto; }
  .assistant { background: var(--panel); border: 1px solid #e3e6eb; }
  .meta { font-size: 12px; color: var(--muted); margin-top: 4px; }
  form { position: fixed; bottom: 0; left: 0; right: 0; display: flex; gap: 8px; padding: 14px 20px; background: var(--panel); border-top: 1px solid #e3e6eb; }
  form input { flex: 1; padding: 10px 12px; border: 1px solid #cfd4dc; border-radius: 8px; font-size: 15px; }
</style>
</head>
<body>
<header>
  <h1>ShopBot</h1>
  <label>Session <input id="session"></label>
  <button class="secondary" id="clear">Clear history</button>
</header>
<main id="log"></main>
<form id="composer">
  <input id="message" autocomplete="off" placeholder="Ask about products, orders, or policies">
  <button type="submit">Send</button>
</form>
<script>
const log = document.getElementById('log');
const sessionInput = document.getElementById('session');
sessionInput.value = localStorage.getItem('parley.session') || 'default';

function session() {
  const id = sessionInput.value.trim() || 'default';
  localStorage.setItem('parley.session', id);
  return id;
}

function render(role, text, meta) {
  const div = document.createElement('div');
  div.className = 'turn ' + role;
  div.textContent = text;
  if (meta) {
    const m = document.createElement('div');
    m.className = 'meta';
    m.textContent = meta;
    div.appendChild(m);
  }
  log.appendChild(div);
  window.scrollTo(0, document.body.scrollHeight);
}

async function loadHistory() {
  log.innerHTML = '';
  const res = await fetch('/sessions/' + encodeURIComponent(session()) + '/history');
  if (!res.ok) return;
  const body = await res.json();
  for (const turn of body.turns) {
    render(turn.role, turn.content, turn.sources ? 'Sources: ' + turn.sources.join(', ') : '');
  }
}

document.getElementById('composer').addEventListener('submit', async (e) => {
  e.preventDefault();
  const input = document.getElementById('message');
  const message = input.value.trim();
  if (!message) return;
  input.value = '';
  render('user', message);
  const res = await fetch('/chat', {
    method: 'POST',
    headers: { 'content-type': 'application/json' },
    body: JSON.stringify({ session_id: session(), message }),
  });
  const body = await res.json();
  if (res.ok) {
    const meta = 'route: ' + body.route + ' (' + body.score.toFixed(2) + ')' +
      (body.sources.length ? ' | sources: ' + body.sources.join(', ') : '');
    render('assistant', body.answer, meta);
  } else {
    render('assistant', body.message || 'Request failed', body.error);
  }
});

document.getElementById('clear').addEventListener('click', async () => {
  await fetch('/sessions/' + encodeURIComponent(session()), { method: 'DELETE' });
  log.innerHTML = '';
});

sessionInput.addEventListener('change', loadHistory);
loadHistory();
</script>
</body>
</html>
"##;

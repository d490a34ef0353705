mod hashcache;
mod object;

fn main() {
    upl_sv::run();
}

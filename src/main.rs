fn main() {
    procguard_lib::run()
}
